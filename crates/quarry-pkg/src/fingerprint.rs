//! Canonical form and fingerprint of a dependency set.
//!
//! The canonical form is compact JSON: an object keyed by dependency name
//! in byte order, each value the entry's serde form (see
//! [`DependencySource`]). The fingerprint is the SHA-256 of that text after
//! [`normalize`], as 64 lowercase hex characters.

use crate::source::{DependencySet, DependencySource, SourceKind};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of checksum and hash values whose hex part gets lower-cased.
pub const SHA256_PREFIX: &str = "sha256:";

/// Errors that can occur when encoding or reading the canonical form.
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("failed to encode canonical form: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to read canonical form: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("canonical entry '{0}' is not an object with a string 'type'")]
    MissingType(String),

    #[error(transparent)]
    Source(#[from] crate::source::SourceError),
}

/// Lower-case the hex digits of a `sha256:` value. Only `A`-`F` change;
/// other characters and values without the prefix are unchanged.
fn normalize_digest(value: &str) -> String {
    match value.strip_prefix(SHA256_PREFIX) {
        Some(digest) => {
            let digest: String = digest
                .chars()
                .map(|c| match c {
                    'A'..='F' => c.to_ascii_lowercase(),
                    _ => c,
                })
                .collect();
            format!("{SHA256_PREFIX}{digest}")
        }
        None => value.to_string(),
    }
}

fn normalize_source(source: &DependencySource) -> DependencySource {
    match source {
        DependencySource::Registry { version, checksum } => DependencySource::Registry {
            version: version.clone(),
            checksum: checksum.as_deref().map(normalize_digest),
        },
        DependencySource::Path { path, hash } => DependencySource::Path {
            path: path.clone(),
            hash: hash.as_deref().map(normalize_digest),
        },
        git @ DependencySource::Git { .. } => git.clone(),
    }
}

/// Normalize a dependency set for fingerprinting.
///
/// Lower-cases the hex digits of `sha256:` checksums and hashes. The type
/// tag is already lowercase in the enum form; [`parse_canonical`] handles
/// mixed-case tags on input.
#[must_use]
pub fn normalize(set: &DependencySet) -> DependencySet {
    set.map_sources(|_, source| normalize_source(source))
}

/// Serialize a dependency set to its canonical bytes.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn canonicalize(set: &DependencySet) -> Result<Vec<u8>, FingerprintError> {
    serde_json::to_vec(set).map_err(FingerprintError::Encode)
}

/// Compute the fingerprint of a dependency set.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn fingerprint(set: &DependencySet) -> Result<String, FingerprintError> {
    let canonical = canonicalize(&normalize(set))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Read a canonical JSON dependency set back.
///
/// The `type` tag of each entry is matched case-insensitively.
///
/// # Errors
///
/// Returns an error if the JSON is malformed, an entry lacks a `type`, or
/// the tag is unknown.
pub fn parse_canonical(bytes: &[u8]) -> Result<DependencySet, FingerprintError> {
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(bytes).map_err(FingerprintError::Decode)?;

    raw.into_iter()
        .map(|(name, mut entry)| {
            let kind = entry
                .get("type")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| FingerprintError::MissingType(name.clone()))?
                .parse::<SourceKind>()?;
            entry["type"] = serde_json::Value::from(kind.as_str());
            let source: DependencySource =
                serde_json::from_value(entry).map_err(FingerprintError::Decode)?;
            Ok((name, source))
        })
        .collect()
}

/// Hash the contents of a directory as `sha256:<hex>`.
///
/// Files are visited in order of their relative path; for each one the
/// relative path (with `/` separators) and then the file bytes are fed to
/// the digest. A path that is a single file is hashed as its bytes.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked or a file cannot be read.
pub fn content_hash(root: impl AsRef<Path>) -> io::Result<String> {
    let root = root.as_ref();
    let mut hasher = Sha256::new();

    if root.is_file() {
        hasher.update(fs::read(root)?);
    } else {
        let mut files = Vec::new();
        collect_files(root, &mut files)?;

        let mut relative: Vec<(String, PathBuf)> = files
            .into_iter()
            .filter_map(|path| {
                let rel = path.strip_prefix(root).ok()?;
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                Some((key, path))
            })
            .collect();
        relative.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, path) in relative {
            hasher.update(key.as_bytes());
            hasher.update(fs::read(&path)?);
        }
    }

    Ok(format!("{SHA256_PREFIX}{}", hex::encode(hasher.finalize())))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
