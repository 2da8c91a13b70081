//! Lock file (`Quarry.lock`) generation and parsing.
//!
//! The lock file has a single `[dependencies]` section with one line per
//! dependency, sorted by name:
//!
//! ```toml
//! [dependencies]
//! http = "1.2.0"
//! json = { version = "2.0.1", checksum = "sha256:9f2c..." }
//! remote = { git = "https://example.com/remote", branch = "main", commit = "4e1a..." }
//! local = { path = "../local", hash = "sha256:07bd..." }
//! ```

use crate::fingerprint::{self, FingerprintError};
use crate::source::{DependencySet, DependencySource, DependencySpec, SourceError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// The lock file name.
pub const LOCK_FILE: &str = "Quarry.lock";

/// Errors that can occur when working with lock files.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("failed to read or write lock file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse lock file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("lock file is out of sync with manifest: {}", .errors.join("; "))]
    OutOfSync { errors: Vec<String> },
}

#[derive(Deserialize)]
struct RawLock {
    #[serde(default)]
    dependencies: BTreeMap<String, DependencySpec>,
}

/// Returns true if `key` can be written without quotes.
fn is_bare_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// A TOML string literal for `value`.
fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn key(name: &str) -> String {
    if is_bare_key(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

/// An inline table with `required` first and non-empty optional fields after it.
fn inline_table(required: (&str, &str), optional: &[(&str, Option<&String>)]) -> String {
    let mut fields = vec![format!("{} = {}", required.0, quote(required.1))];
    for &(name, value) in optional {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            fields.push(format!("{name} = {}", quote(value)));
        }
    }
    format!("{{ {} }}", fields.join(", "))
}

fn encode_source(source: &DependencySource) -> String {
    match source {
        DependencySource::Registry { version, checksum } => {
            match checksum.as_ref().filter(|c| !c.is_empty()) {
                Some(checksum) => inline_table(("version", version), &[("checksum", Some(checksum))]),
                None => quote(version),
            }
        }
        DependencySource::Git {
            url,
            branch,
            commit,
        } => inline_table(
            ("git", url),
            &[("branch", branch.as_ref()), ("commit", commit.as_ref())],
        ),
        DependencySource::Path { path, hash } => {
            inline_table(("path", path), &[("hash", hash.as_ref())])
        }
    }
}

/// Encode a dependency set as lock file text.
#[must_use]
pub fn encode(set: &DependencySet) -> String {
    let mut out = String::from("[dependencies]\n");
    for (name, source) in set {
        out.push_str(&key(name));
        out.push_str(" = ");
        out.push_str(&encode_source(source));
        out.push('\n');
    }
    out
}

/// Decode lock file text into a dependency set.
///
/// A missing `[dependencies]` section decodes to an empty set.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML or an entry has no
/// `git`, `path` or `version` key.
pub fn decode(text: &str) -> Result<DependencySet, LockError> {
    let raw: RawLock = toml::from_str(text)?;
    Ok(DependencySet::from_specs(&raw.dependencies)?)
}

/// A parsed lock file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    /// Locked dependency sources.
    pub dependencies: DependencySet,
}

impl Lockfile {
    /// Create a lock file for a resolved dependency set.
    #[must_use]
    pub fn new(dependencies: DependencySet) -> Self {
        Self { dependencies }
    }

    /// Parse a lock file from its text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be decoded.
    pub fn parse(content: &str) -> Result<Self, LockError> {
        decode(content).map(Self::new)
    }

    /// Load a lock file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref();
        debug!("Reading lock file: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Serialize the lock file to TOML text.
    #[must_use]
    pub fn to_toml_string(&self) -> String {
        encode(&self.dependencies)
    }

    /// Write the lock file to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let path = path.as_ref();
        debug!(
            "Writing lock file with {} dependencies: {}",
            self.dependencies.len(),
            path.display()
        );
        std::fs::write(path, self.to_toml_string())?;
        Ok(())
    }

    /// Fingerprint of the locked dependency set.
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical form cannot be encoded.
    pub fn fingerprint(&self) -> Result<String, FingerprintError> {
        fingerprint::fingerprint(&self.dependencies)
    }
}
