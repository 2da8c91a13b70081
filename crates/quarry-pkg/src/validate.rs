//! Structural validation of a lock file against a manifest.

use crate::lockfile::{LockError, LOCK_FILE};
use crate::source::{DependencySet, DependencySource};
use crate::version::{satisfies, Version};
use tracing::debug;

/// Result of comparing manifest dependencies with locked dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// True iff `errors` is empty.
    pub valid: bool,
    /// Inconsistencies that make the lock file unusable.
    pub errors: Vec<String>,
    /// Informational findings that do not affect `valid`.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Turn a failed report into an error.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::OutOfSync`] with the report's errors if it is
    /// not valid.
    pub fn into_result(self) -> Result<Vec<String>, LockError> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(LockError::OutOfSync {
                errors: self.errors,
            })
        }
    }
}

/// Compares a manifest's dependencies with a lock file's.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockValidator {
    check_versions: bool,
}

impl LockValidator {
    /// Create a validator that only checks structure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require locked registry versions to satisfy the manifest constraint.
    #[must_use]
    pub fn with_version_check(mut self, check: bool) -> Self {
        self.check_versions = check;
        self
    }

    /// Validate `lock` against `manifest`.
    ///
    /// Every manifest dependency must be locked with the same source kind.
    /// Locked dependencies the manifest no longer declares produce warnings.
    #[must_use]
    pub fn validate(&self, manifest: &DependencySet, lock: &DependencySet) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (name, declared) in manifest {
            let Some(locked) = lock.get(name) else {
                errors.push(format!(
                    "lock is outdated: dependency missing: '{name}' is declared in the manifest but not in {LOCK_FILE}"
                ));
                continue;
            };

            if declared.kind() != locked.kind() {
                errors.push(format!(
                    "lock is outdated: source type mismatch for '{name}' (manifest: {}, lock: {})",
                    declared.kind(),
                    locked.kind()
                ));
                continue;
            }

            if self.check_versions {
                if let (
                    DependencySource::Registry {
                        version: constraint,
                        ..
                    },
                    DependencySource::Registry {
                        version: pinned, ..
                    },
                ) = (declared, locked)
                {
                    if !satisfies(&Version::parse(pinned), constraint) {
                        errors.push(format!(
                            "lock is outdated: locked version '{pinned}' for '{name}' does not satisfy constraint '{constraint}'"
                        ));
                    }
                }
            }
        }

        for name in lock.names().filter(|name| !manifest.contains(name)) {
            warnings.push(format!(
                "{LOCK_FILE} contains '{name}' which is not declared in the manifest"
            ));
        }

        debug!(
            "Lock validation: {} errors, {} warnings",
            errors.len(),
            warnings.len()
        );
        ValidationReport::new(errors, warnings)
    }
}

/// Structural validation with default options.
#[must_use]
pub fn validate(manifest: &DependencySet, lock: &DependencySet) -> ValidationReport {
    LockValidator::new().validate(manifest, lock)
}
