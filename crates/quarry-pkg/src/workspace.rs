//! Workspace support for multi-package projects.
//!
//! A workspace groups several Quarry packages under one root so they can be
//! built together in dependency order.
//!
//! ```toml
//! # Workspace.toml at workspace root
//! [workspace]
//! members = ["packages/*", "tools/cli"]
//! exclude = ["packages/experimental"]
//! ```

use crate::graph::{BuildGraph, CycleError};
use crate::manifest::{Manifest, ManifestError, MANIFEST_FILE};
use crate::source::{DependencySet, SourceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// The workspace manifest file name.
pub const WORKSPACE_FILE: &str = "Workspace.toml";

/// Errors that can occur when working with workspaces.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("manifest error in {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse Workspace.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("not a workspace: missing [workspace] section")]
    NotAWorkspace,

    #[error("duplicate workspace member: {0}")]
    DuplicateMember(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// The `Workspace.toml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    /// Workspace configuration.
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
}

/// Workspace configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Member packages specified as glob patterns.
    #[serde(default)]
    pub members: Vec<String>,

    /// Packages to exclude from the workspace.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A discovered workspace member.
#[derive(Debug, Clone)]
pub struct WorkspaceMember {
    /// Path to the member package root.
    pub path: PathBuf,

    /// Package name.
    pub name: String,

    /// The member's manifest.
    pub manifest: Manifest,
}

impl WorkspaceMember {
    /// The member's normalized dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency entry has no source.
    pub fn dependencies(&self) -> Result<DependencySet, SourceError> {
        self.manifest.dependency_set()
    }
}

/// A complete workspace with all discovered members.
#[derive(Debug)]
pub struct Workspace {
    /// Root directory of the workspace.
    pub root: PathBuf,

    /// The workspace configuration.
    pub config: WorkspaceConfig,

    /// Discovered member packages, in discovery order.
    pub members: Vec<WorkspaceMember>,
}

impl Workspace {
    /// Load a workspace from its root directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `Workspace.toml` is missing or invalid, or a
    /// member manifest cannot be loaded.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref().to_path_buf();
        let manifest = WorkspaceManifest::from_path(root.join(WORKSPACE_FILE))?;
        let config = manifest.workspace.ok_or(WorkspaceError::NotAWorkspace)?;
        let members = Self::discover_members(&root, &config)?;

        debug!(
            "Loaded workspace at {} with {} members",
            root.display(),
            members.len()
        );
        Ok(Self {
            root,
            config,
            members,
        })
    }

    /// Find a workspace by searching upward from a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no `Workspace.toml` is found or it cannot be
    /// loaded.
    pub fn find(start: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let mut current = start.as_ref();

        loop {
            if current.join(WORKSPACE_FILE).is_file() {
                return Self::load(current);
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => return Err(WorkspaceError::NotAWorkspace),
            }
        }
    }

    /// Discover all member packages.
    fn discover_members(
        root: &Path,
        config: &WorkspaceConfig,
    ) -> Result<Vec<WorkspaceMember>, WorkspaceError> {
        let mut members: Vec<WorkspaceMember> = Vec::new();
        let mut seen_paths = HashSet::new();

        for pattern in &config.members {
            let full_pattern = root.join(pattern);
            let pattern_str = full_pattern.to_string_lossy();

            for entry in glob::glob(&pattern_str)? {
                let path = entry.map_err(|e| WorkspaceError::Io(e.into_error()))?;

                if !seen_paths.insert(path.clone()) {
                    continue;
                }

                if Self::is_excluded(&path, root, &config.exclude) {
                    debug!("Excluding workspace member: {}", path.display());
                    continue;
                }

                let manifest_path = path.join(MANIFEST_FILE);
                if !manifest_path.is_file() {
                    continue;
                }

                let manifest = Manifest::from_path(&manifest_path).map_err(|source| {
                    WorkspaceError::Manifest {
                        path: manifest_path.clone(),
                        source,
                    }
                })?;
                let name = manifest.package.name.clone();

                if members.iter().any(|m| m.name == name) {
                    return Err(WorkspaceError::DuplicateMember(name));
                }

                members.push(WorkspaceMember {
                    path,
                    name,
                    manifest,
                });
            }
        }

        Ok(members)
    }

    /// Check if a path is excluded.
    fn is_excluded(path: &Path, root: &Path, excludes: &[String]) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative_str = relative.to_string_lossy();

        excludes.iter().any(|exclude| {
            glob::Pattern::new(exclude)
                .map(|p| p.matches(&relative_str))
                .unwrap_or(false)
        })
    }

    /// Get a member by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&WorkspaceMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Get the names of all members.
    #[must_use]
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Check if a path is within this workspace.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Build graph with one node per member, depending on the names of its
    /// declared dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if a member has a malformed dependency entry.
    pub fn build_graph(&self) -> Result<BuildGraph, WorkspaceError> {
        let mut graph = BuildGraph::new();
        for member in &self.members {
            let dependencies = member.dependencies()?;
            graph.add_node(member.name.as_str(), dependencies.names());
        }
        Ok(graph)
    }

    /// Order every member and external dependency for building.
    ///
    /// # Errors
    ///
    /// Returns an error if the member graph cannot be built or has a cycle.
    pub fn build_order(&self) -> Result<Vec<String>, WorkspaceError> {
        Ok(self.build_graph()?.topological_order()?)
    }
}

impl WorkspaceManifest {
    /// Load a workspace manifest from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workspace manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, WorkspaceError> {
        Ok(toml::from_str(content)?)
    }

    /// Check if this manifest defines a workspace.
    #[must_use]
    pub fn is_workspace(&self) -> bool {
        self.workspace.is_some()
    }
}
