//! Dependency sources and dependency sets.
//!
//! A manifest or lockfile entry is either a bare version string or a table.
//! [`DependencySpec`] captures that raw shape; [`DependencySource`] is the
//! normalized form every later stage works with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when normalizing a dependency source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The entry has none of the keys that identify a source.
    #[error("invalid dependency '{name}': {reason}")]
    Invalid { name: String, reason: &'static str },

    /// The source type tag is not one of `registry`, `git` or `path`.
    #[error("unknown source type '{0}', expected one of: registry, git, path")]
    UnknownKind(String),
}

/// Raw dependency specification as written in `Quarry.toml` or `Quarry.lock`.
///
/// Can be either a simple version string or a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Simple version string: `"1.0.0"` or `">=2.1"`.
    Simple(String),

    /// Table form with source-specific keys.
    Detailed(DetailedSpec),
}

/// Table form of a dependency specification.
///
/// Keys for every source kind are accepted here; which ones matter is
/// decided by [`DependencySource::parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedSpec {
    /// Git repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,

    /// Git branch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Git tag name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Git revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Resolved git commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Path to a local dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Content hash of a path dependency (`sha256:...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Registry version or constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Registry package checksum (`sha256:...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// The kind of a dependency source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Package registry.
    Registry,
    /// Git repository.
    Git,
    /// Local path.
    Path,
}

impl SourceKind {
    /// Returns the lowercase type tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Git => "git",
            Self::Path => "path",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "registry" => Ok(Self::Registry),
            "git" => Ok(Self::Git),
            "path" => Ok(Self::Path),
            _ => Err(SourceError::UnknownKind(s.to_string())),
        }
    }
}

/// Where a dependency comes from, plus its integrity pin.
///
/// The serde form is the canonical JSON entry used for fingerprinting:
/// the `type` tag first, then the variant's fields in declaration order,
/// with absent or empty optional fields left out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DependencySource {
    /// Package from a registry.
    Registry {
        version: String,
        #[serde(default, skip_serializing_if = "is_unset")]
        checksum: Option<String>,
    },
    /// Git repository. `branch` holds whichever ref hint won.
    Git {
        #[serde(rename = "git_url")]
        url: String,
        #[serde(rename = "git_branch", default, skip_serializing_if = "is_unset")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "is_unset")]
        commit: Option<String>,
    },
    /// Local path dependency.
    Path {
        path: String,
        #[serde(default, skip_serializing_if = "is_unset")]
        hash: Option<String>,
    },
}

#[allow(clippy::ref_option)]
fn is_unset(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

/// Drop empty strings so they read the same as a missing key.
fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}

impl DependencySource {
    /// A registry source with no checksum.
    #[must_use]
    pub fn registry(version: impl Into<String>) -> Self {
        Self::Registry {
            version: version.into(),
            checksum: None,
        }
    }

    /// Normalize a raw specification.
    ///
    /// A bare string is a registry version. A table is classified by the
    /// first key present among `git`, `path` and `version`. For git, the
    /// ref hint is taken from `branch`, then `tag`, then `rev`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Invalid`] if a table has none of those keys.
    pub fn parse(name: &str, spec: &DependencySpec) -> Result<Self, SourceError> {
        let detailed = match spec {
            DependencySpec::Simple(version) => return Ok(Self::registry(version.clone())),
            DependencySpec::Detailed(detailed) => detailed,
        };

        if let Some(ref url) = detailed.git {
            let branch = non_empty(detailed.branch.as_ref())
                .or_else(|| non_empty(detailed.tag.as_ref()))
                .or_else(|| non_empty(detailed.rev.as_ref()));
            Ok(Self::Git {
                url: url.clone(),
                branch,
                commit: non_empty(detailed.commit.as_ref()),
            })
        } else if let Some(ref path) = detailed.path {
            Ok(Self::Path {
                path: path.clone(),
                hash: non_empty(detailed.hash.as_ref()),
            })
        } else if let Some(ref version) = detailed.version {
            Ok(Self::Registry {
                version: version.clone(),
                checksum: non_empty(detailed.checksum.as_ref()),
            })
        } else {
            Err(SourceError::Invalid {
                name: name.to_string(),
                reason: "expected one of 'git', 'path' or 'version'",
            })
        }
    }

    /// Returns the source kind.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Registry { .. } => SourceKind::Registry,
            Self::Git { .. } => SourceKind::Git,
            Self::Path { .. } => SourceKind::Path,
        }
    }

    /// Returns the registry version or constraint, if this is a registry source.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Registry { version, .. } => Some(version),
            _ => None,
        }
    }

    /// Convert back to the raw table form, with the winning git ref as `branch`.
    #[must_use]
    pub fn to_spec(&self) -> DependencySpec {
        match self {
            Self::Registry {
                version,
                checksum: None,
            } => DependencySpec::Simple(version.clone()),
            Self::Registry { version, checksum } => DependencySpec::Detailed(DetailedSpec {
                version: Some(version.clone()),
                checksum: checksum.clone(),
                ..DetailedSpec::default()
            }),
            Self::Git {
                url,
                branch,
                commit,
            } => DependencySpec::Detailed(DetailedSpec {
                git: Some(url.clone()),
                branch: branch.clone(),
                commit: commit.clone(),
                ..DetailedSpec::default()
            }),
            Self::Path { path, hash } => DependencySpec::Detailed(DetailedSpec {
                path: Some(path.clone()),
                hash: hash.clone(),
                ..DetailedSpec::default()
            }),
        }
    }
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry { version, .. } => write!(f, "registry ({version})"),
            Self::Git { url, branch, .. } => match branch {
                Some(branch) => write!(f, "git:{url}#{branch}"),
                None => write!(f, "git:{url}"),
            },
            Self::Path { path, .. } => write!(f, "path:{path}"),
        }
    }
}

/// A set of dependencies keyed by name.
///
/// Iteration is always in byte order of the name, whatever order entries
/// were inserted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencySet {
    entries: BTreeMap<String, DependencySource>,
}

impl DependencySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize every entry of a raw dependency table.
    ///
    /// # Errors
    ///
    /// Returns the first entry that cannot be normalized.
    pub fn from_specs<'a, I>(specs: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = (&'a String, &'a DependencySpec)>,
    {
        specs
            .into_iter()
            .map(|(name, spec)| Ok((name.clone(), DependencySource::parse(name, spec)?)))
            .collect()
    }

    /// Insert or replace an entry, returning the previous source.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        source: DependencySource,
    ) -> Option<DependencySource> {
        self.entries.insert(name.into(), source)
    }

    /// Get the source of a dependency.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DependencySource> {
        self.entries.get(name)
    }

    /// Returns true if the set contains `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the number of dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DependencySource)> {
        self.entries.iter()
    }

    /// Iterate over names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Apply `f` to every source, producing a new set.
    #[must_use]
    pub fn map_sources<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&str, &DependencySource) -> DependencySource,
    {
        self.entries
            .iter()
            .map(|(name, source)| (name.clone(), f(name, source)))
            .collect()
    }
}

impl FromIterator<(String, DependencySource)> for DependencySet {
    fn from_iter<T: IntoIterator<Item = (String, DependencySource)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DependencySet {
    type Item = (String, DependencySource);
    type IntoIter = std::collections::btree_map::IntoIter<String, DependencySource>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a DependencySet {
    type Item = (&'a String, &'a DependencySource);
    type IntoIter = std::collections::btree_map::Iter<'a, String, DependencySource>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
