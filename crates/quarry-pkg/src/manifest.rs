//! Quarry package manifest (`Quarry.toml`) parsing and validation.

use crate::source::{DependencySet, DependencySpec, SourceError};
use crate::version::is_valid_package_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// The manifest file name.
pub const MANIFEST_FILE: &str = "Quarry.toml";

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    #[error(transparent)]
    Dependency(#[from] SourceError),
}

/// The complete `Quarry.toml` manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Package metadata (required).
    pub package: Package,

    /// Declared dependencies, as written.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
}

/// Package metadata section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    /// Package name (required).
    pub name: String,

    /// Package version (required, semver).
    pub version: String,

    /// Language edition, e.g. `"2025"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,

    /// Package authors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// SPDX license identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl Manifest {
    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, a required field is missing,
    /// or a dependency entry has no source.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    ///
    /// # Errors
    ///
    /// Returns the first problem found with the name, version or
    /// dependencies.
    pub fn validate(&self) -> Result<(), ManifestError> {
        self.validate_name()?;
        self.validate_version()?;
        self.dependency_set()?;
        Ok(())
    }

    fn validate_name(&self) -> Result<(), ManifestError> {
        let name = &self.package.name;

        if name.is_empty() {
            return Err(ManifestError::InvalidName(
                name.clone(),
                "name cannot be empty",
            ));
        }

        if !is_valid_package_name(name) {
            return Err(ManifestError::InvalidName(
                name.clone(),
                "name must start and end with a letter or number and contain only letters, numbers, hyphens, and underscores",
            ));
        }

        Ok(())
    }

    fn validate_version(&self) -> Result<(), ManifestError> {
        let version = &self.package.version;

        semver::Version::parse(version)
            .map_err(|e| ManifestError::InvalidVersion(version.clone(), e.to_string()))?;

        Ok(())
    }

    /// Normalize the declared dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry has no `git`, `path` or `version` key.
    pub fn dependency_set(&self) -> Result<DependencySet, SourceError> {
        DependencySet::from_specs(&self.dependencies)
    }

    /// Serialize the manifest to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            package: Package {
                name: String::from("my-package"),
                version: String::from("0.1.0"),
                edition: None,
                authors: Vec::new(),
                description: None,
                license: None,
                repository: None,
            },
            dependencies: BTreeMap::new(),
        }
    }
}
