//! Dependency resolution and build planning for the Quarry package manager.
//!
//! This crate provides:
//! - Version comparison, constraint matching and selection
//! - Normalization of registry, git and path dependency sources
//! - Canonical encoding and SHA-256 fingerprints of dependency sets
//! - Build graph cycle detection and deterministic build order
//! - `Quarry.lock` generation, parsing and validation against a manifest
//! - Parsing and validation of `Quarry.toml` manifests
//! - Workspace support for multi-package projects

mod fingerprint;
mod graph;
mod lockfile;
mod manifest;
mod resolve;
mod source;
mod validate;
mod version;
mod workspace;

pub use fingerprint::{
    canonicalize, content_hash, fingerprint, normalize, parse_canonical, FingerprintError,
    SHA256_PREFIX,
};
pub use graph::{BuildGraph, CycleError};
pub use lockfile::{decode, encode, LockError, Lockfile, LOCK_FILE};
pub use manifest::{Manifest, ManifestError, Package, MANIFEST_FILE};
pub use resolve::{BuildPlan, PlanError, ResolveError, Resolver, VersionIndex};
pub use source::{DependencySet, DependencySource, DependencySpec, DetailedSpec, SourceError, SourceKind};
pub use validate::{validate, LockValidator, ValidationReport};
pub use version::{
    compare, is_semver, is_valid_package_name, normalize_name, satisfies, select, Constraint,
    Version,
};
pub use workspace::{
    Workspace, WorkspaceConfig, WorkspaceError, WorkspaceManifest, WorkspaceMember, WORKSPACE_FILE,
};
