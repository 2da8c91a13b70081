//! Dependency resolution for Quarry packages.
//!
//! This module provides:
//! - Selection of concrete registry versions from a [`VersionIndex`]
//! - Reuse of versions pinned by a previous lock file
//! - Content hashing of path dependencies
//! - The full resolution pipeline producing a [`BuildPlan`]

use crate::fingerprint::{self, content_hash, FingerprintError};
use crate::graph::{BuildGraph, CycleError};
use crate::lockfile;
use crate::manifest::{Manifest, ManifestError, MANIFEST_FILE};
use crate::source::{DependencySet, DependencySource, SourceError};
use crate::validate::{LockValidator, ValidationReport};
use crate::version::{normalize_name, satisfies, select, Version};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur during dependency resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A registry dependency has an empty constraint.
    #[error("dependency '{0}' has no version constraint")]
    MissingConstraint(String),

    /// The index has no entry for the package.
    #[error("package '{0}' not found in the version index")]
    UnknownPackage(String),

    /// No published version satisfies the constraint.
    #[error("cannot resolve dependency '{package}' with constraint '{constraint}'. Available versions: {}", .available.join(", "))]
    NoMatchingVersion {
        package: String,
        constraint: String,
        available: Vec<String>,
    },

    /// A path dependency could not be hashed.
    #[error("failed to hash path dependency '{package}' at {}: {source}", .path.display())]
    PathHash {
        package: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from any stage of [`Resolver::plan`].
#[derive(Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("manifest error in {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
}

/// Published versions of registry packages.
pub trait VersionIndex {
    /// Versions published for `name`, or `None` if the package is unknown.
    fn versions(&self, name: &str) -> Option<&[String]>;
}

impl VersionIndex for BTreeMap<String, Vec<String>> {
    fn versions(&self, name: &str) -> Option<&[String]> {
        self.get(name)
            .or_else(|| self.get(&normalize_name(name)))
            .map(Vec::as_slice)
    }
}

impl<S: BuildHasher> VersionIndex for HashMap<String, Vec<String>, S> {
    fn versions(&self, name: &str) -> Option<&[String]> {
        self.get(name)
            .or_else(|| self.get(&normalize_name(name)))
            .map(Vec::as_slice)
    }
}

/// Everything a build needs from one resolution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// Resolved dependency sources.
    pub dependencies: DependencySet,
    /// Fingerprint of the resolved set.
    pub fingerprint: String,
    /// Build order, dependencies first, root last.
    pub build_order: Vec<String>,
    /// Lock file text for the resolved set.
    pub lockfile: String,
    /// The previous lock file checked against the declared dependencies,
    /// when one was given.
    pub validation: Option<ValidationReport>,
}

/// Dependency resolver for Quarry packages.
#[derive(Debug)]
pub struct Resolver<'a, I: ?Sized> {
    index: &'a I,
    locked: Option<DependencySet>,
    project_dir: Option<PathBuf>,
}

impl<'a, I: VersionIndex + ?Sized> Resolver<'a, I> {
    /// Create a resolver over a version index.
    #[must_use]
    pub fn new(index: &'a I) -> Self {
        Self {
            index,
            locked: None,
            project_dir: None,
        }
    }

    /// Prefer versions pinned by a previous lock file.
    #[must_use]
    pub fn with_locked(mut self, locked: DependencySet) -> Self {
        self.locked = Some(locked);
        self
    }

    /// Hash path dependencies relative to this directory.
    #[must_use]
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Resolve every dependency to a pinned source.
    ///
    /// Registry constraints become concrete versions. Git and path sources
    /// are kept, with the commit taken from the lock file and the path hash
    /// computed when a project directory is set.
    ///
    /// # Errors
    ///
    /// Returns an error if a registry constraint is empty, the package is
    /// unknown, no version matches, or a path dependency cannot be read.
    pub fn resolve(&self, dependencies: &DependencySet) -> Result<DependencySet, ResolveError> {
        let mut resolved = DependencySet::new();

        for (name, source) in dependencies {
            let pinned = match source {
                DependencySource::Registry { version, checksum } => {
                    self.resolve_registry(name, version, checksum.as_ref())?
                }
                DependencySource::Git {
                    url,
                    branch,
                    commit,
                } => self.resolve_git(name, url, branch.as_ref(), commit.as_ref()),
                DependencySource::Path { path, hash } => {
                    self.resolve_path(name, path, hash.as_ref())?
                }
            };
            trace!("Resolved {} -> {}", name, pinned);
            resolved.insert(name.clone(), pinned);
        }

        debug!("Resolved {} dependencies", resolved.len());
        Ok(resolved)
    }

    fn locked(&self, name: &str) -> Option<&DependencySource> {
        self.locked.as_ref().and_then(|set| set.get(name))
    }

    fn resolve_registry(
        &self,
        name: &str,
        constraint: &str,
        checksum: Option<&String>,
    ) -> Result<DependencySource, ResolveError> {
        if constraint.trim().is_empty() {
            return Err(ResolveError::MissingConstraint(name.to_string()));
        }

        if let Some(locked) = self.locked(name) {
            if let DependencySource::Registry { version, .. } = locked {
                if satisfies(&Version::parse(version), constraint) {
                    debug!("Keeping locked version {} for {}", version, name);
                    return Ok(locked.clone());
                }
            }
        }

        let available = self
            .index
            .versions(name)
            .ok_or_else(|| ResolveError::UnknownPackage(name.to_string()))?;

        let selected = select(constraint, available.iter().map(String::as_str)).ok_or_else(|| {
            ResolveError::NoMatchingVersion {
                package: name.to_string(),
                constraint: constraint.to_string(),
                available: available.to_vec(),
            }
        })?;

        Ok(DependencySource::Registry {
            version: selected.as_str().to_string(),
            checksum: checksum.cloned(),
        })
    }

    fn resolve_git(
        &self,
        name: &str,
        url: &str,
        branch: Option<&String>,
        commit: Option<&String>,
    ) -> DependencySource {
        let commit = commit.cloned().or_else(|| match self.locked(name) {
            Some(DependencySource::Git {
                url: locked_url,
                branch: locked_branch,
                commit: locked_commit,
            }) if locked_url == url && locked_branch.as_ref() == branch => locked_commit.clone(),
            _ => None,
        });

        DependencySource::Git {
            url: url.to_string(),
            branch: branch.cloned(),
            commit,
        }
    }

    fn resolve_path(
        &self,
        name: &str,
        path: &str,
        hash: Option<&String>,
    ) -> Result<DependencySource, ResolveError> {
        let hash = match (hash, &self.project_dir) {
            (Some(hash), _) => Some(hash.clone()),
            (None, Some(dir)) => hash_path_dependency(name, &dir.join(path))?,
            (None, None) => None,
        };

        Ok(DependencySource::Path {
            path: path.to_string(),
            hash,
        })
    }

    /// Run the full pipeline for a package and its declared dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails, the fingerprint cannot be
    /// computed, a path dependency's manifest is invalid, or the build
    /// graph has a cycle.
    pub fn plan(&self, root: &str, dependencies: &DependencySet) -> Result<BuildPlan, PlanError> {
        let validation = self
            .locked
            .as_ref()
            .map(|locked| LockValidator::new().validate(dependencies, locked));

        let resolved = self.resolve(dependencies)?;
        let fingerprint = fingerprint::fingerprint(&resolved)?;
        let build_order = self.build_graph(root, &resolved)?.topological_order()?;
        let lockfile = lockfile::encode(&resolved);

        debug!("Planned build of {} with fingerprint {}", root, fingerprint);
        Ok(BuildPlan {
            dependencies: resolved,
            fingerprint,
            build_order,
            lockfile,
            validation,
        })
    }

    /// Build graph for `root` and its resolved dependencies.
    ///
    /// With a project directory set, every path dependency that has its own
    /// `Quarry.toml` becomes a node depending on the names it declares.
    /// Nested path dependencies are followed relative to the directory of
    /// the manifest that declares them.
    ///
    /// # Errors
    ///
    /// Returns an error if a path dependency's manifest cannot be loaded.
    pub fn build_graph(
        &self,
        root: &str,
        resolved: &DependencySet,
    ) -> Result<BuildGraph, PlanError> {
        let mut graph = BuildGraph::for_package(root, resolved);
        let Some(project_dir) = &self.project_dir else {
            return Ok(graph);
        };

        let mut pending: VecDeque<(String, PathBuf)> =
            path_dependencies(project_dir, resolved).collect();
        while let Some((name, dir)) = pending.pop_front() {
            if graph.contains(&name) {
                continue;
            }

            let manifest_path = dir.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                trace!("Path dependency {} has no manifest", name);
                continue;
            }

            let manifest =
                Manifest::from_path(&manifest_path).map_err(|source| PlanError::Manifest {
                    path: manifest_path.clone(),
                    source,
                })?;
            let dependencies = manifest.dependency_set()?;
            debug!(
                "Path dependency {} declares {} dependencies",
                name,
                dependencies.len()
            );

            graph.add_node(name.as_str(), dependencies.names());
            pending.extend(path_dependencies(&dir, &dependencies));
        }

        Ok(graph)
    }

    /// Run the full pipeline for a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency entry is malformed or any stage of
    /// [`Resolver::plan`] fails.
    pub fn plan_manifest(&self, manifest: &Manifest) -> Result<BuildPlan, PlanError> {
        let dependencies = manifest.dependency_set()?;
        self.plan(&manifest.package.name, &dependencies)
    }
}

/// Names and directories of the path dependencies in `set`, relative to `base`.
fn path_dependencies<'s>(
    base: &'s Path,
    set: &'s DependencySet,
) -> impl Iterator<Item = (String, PathBuf)> + 's {
    set.iter().filter_map(move |(name, source)| match source {
        DependencySource::Path { path, .. } => Some((name.clone(), base.join(path))),
        _ => None,
    })
}

/// Hash a path dependency if it is a directory.
fn hash_path_dependency(name: &str, path: &Path) -> Result<Option<String>, ResolveError> {
    if !path.is_dir() {
        debug!("Path dependency {} is not a directory: {}", name, path.display());
        return Ok(None);
    }

    content_hash(path)
        .map(Some)
        .map_err(|source| ResolveError::PathHash {
            package: name.to_string(),
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::decode;
    use tempfile::TempDir;

    fn index() -> BTreeMap<String, Vec<String>> {
        let mut index = BTreeMap::new();
        index.insert(
            "http".to_string(),
            vec!["1.0.0".to_string(), "1.4.2".to_string(), "2.0.0".to_string()],
        );
        index.insert(
            "json".to_string(),
            vec!["0.9.0".to_string(), "1.0.3".to_string(), "1.0.10".to_string()],
        );
        index
    }

    fn deps(entries: &[(&str, DependencySource)]) -> DependencySet {
        entries
            .iter()
            .map(|(name, source)| ((*name).to_string(), source.clone()))
            .collect()
    }

    #[test]
    fn selects_highest_matching_version() {
        let index = index();
        let resolver = Resolver::new(&index);
        let resolved = resolver
            .resolve(&deps(&[
                ("http", DependencySource::registry("~>1.4")),
                ("json", DependencySource::registry(">=1.0")),
            ]))
            .unwrap();
        assert_eq!(resolved.get("http"), Some(&DependencySource::registry("1.4.2")));
        assert_eq!(resolved.get("json"), Some(&DependencySource::registry("1.0.10")));
    }

    #[test]
    fn index_lookup_normalizes_names() {
        let index = index();
        let resolved = Resolver::new(&index)
            .resolve(&deps(&[("HTTP", DependencySource::registry("*"))]))
            .unwrap();
        assert_eq!(resolved.get("HTTP"), Some(&DependencySource::registry("2.0.0")));
    }

    #[test]
    fn hash_map_index_works() {
        let index: HashMap<String, Vec<String>> = index().into_iter().collect();
        let resolved = Resolver::new(&index)
            .resolve(&deps(&[("http", DependencySource::registry("1.0.0"))]))
            .unwrap();
        assert_eq!(resolved.get("http"), Some(&DependencySource::registry("1.0.0")));
    }

    #[test]
    fn no_matching_version_is_an_error() {
        let index = index();
        let err = Resolver::new(&index)
            .resolve(&deps(&[("http", DependencySource::registry(">=3.0"))]))
            .unwrap_err();
        match err {
            ResolveError::NoMatchingVersion {
                package, available, ..
            } => {
                assert_eq!(package, "http");
                assert_eq!(available.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_package_and_empty_constraint() {
        let index = index();
        let resolver = Resolver::new(&index);
        let err = resolver
            .resolve(&deps(&[("missing", DependencySource::registry("*"))]))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownPackage(ref n) if n == "missing"));

        let err = resolver
            .resolve(&deps(&[("http", DependencySource::registry(""))]))
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingConstraint(_)));
    }

    #[test]
    fn locked_version_is_preferred_while_it_satisfies() {
        let index = index();
        let locked = deps(&[(
            "http",
            DependencySource::Registry {
                version: "1.0.0".to_string(),
                checksum: Some("sha256:aa".to_string()),
            },
        )]);
        let resolver = Resolver::new(&index).with_locked(locked.clone());

        let resolved = resolver
            .resolve(&deps(&[("http", DependencySource::registry(">=1.0"))]))
            .unwrap();
        assert_eq!(resolved.get("http"), locked.get("http"));

        let resolved = resolver
            .resolve(&deps(&[("http", DependencySource::registry(">=2.0"))]))
            .unwrap();
        assert_eq!(resolved.get("http"), Some(&DependencySource::registry("2.0.0")));
    }

    #[test]
    fn git_commit_comes_from_matching_lock_entry() {
        let index = index();
        let declared = DependencySource::Git {
            url: "https://x/repo".to_string(),
            branch: Some("main".to_string()),
            commit: None,
        };
        let locked = deps(&[(
            "remote",
            DependencySource::Git {
                url: "https://x/repo".to_string(),
                branch: Some("main".to_string()),
                commit: Some("abc123".to_string()),
            },
        )]);

        let resolved = Resolver::new(&index)
            .with_locked(locked)
            .resolve(&deps(&[("remote", declared.clone())]))
            .unwrap();
        assert!(matches!(
            resolved.get("remote"),
            Some(DependencySource::Git { commit: Some(c), .. }) if c == "abc123"
        ));

        let resolved = Resolver::new(&index)
            .resolve(&deps(&[("remote", declared.clone())]))
            .unwrap();
        assert_eq!(resolved.get("remote"), Some(&declared));
    }

    #[test]
    fn path_dependency_is_hashed_under_project_dir() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("vendor/lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("main.qr"), "fn main() {}").unwrap();

        let index = index();
        let declared = deps(&[(
            "lib",
            DependencySource::Path {
                path: "vendor/lib".to_string(),
                hash: None,
            },
        )]);

        let resolved = Resolver::new(&index)
            .with_project_dir(dir.path())
            .resolve(&declared)
            .unwrap();
        let expected = content_hash(&lib).unwrap();
        assert!(matches!(
            resolved.get("lib"),
            Some(DependencySource::Path { hash: Some(h), .. }) if *h == expected
        ));

        let resolved = Resolver::new(&index).resolve(&declared).unwrap();
        assert_eq!(resolved, declared);
    }

    #[test]
    fn missing_path_dependency_stays_unhashed() {
        let dir = TempDir::new().unwrap();
        let index = index();
        let declared = deps(&[(
            "ghost",
            DependencySource::Path {
                path: "nowhere".to_string(),
                hash: None,
            },
        )]);
        let resolved = Resolver::new(&index)
            .with_project_dir(dir.path())
            .resolve(&declared)
            .unwrap();
        assert_eq!(resolved, declared);
    }

    #[test]
    fn plan_produces_every_output() {
        let index = index();
        let declared = deps(&[
            ("json", DependencySource::registry("~>1.0")),
            ("http", DependencySource::registry(">=1.0")),
        ]);

        let plan = Resolver::new(&index).plan("app", &declared).unwrap();
        assert_eq!(plan.fingerprint.len(), 64);
        assert_eq!(plan.build_order, vec!["http", "json", "app"]);
        assert_eq!(decode(&plan.lockfile).unwrap(), plan.dependencies);
        assert!(plan.validation.is_none());

        let again = Resolver::new(&index).plan("app", &declared).unwrap();
        assert_eq!(again, plan);
    }

    #[test]
    fn plan_validates_previous_lock() {
        let index = index();
        let declared = deps(&[("http", DependencySource::registry(">=1.0"))]);
        let locked = deps(&[
            ("http", DependencySource::registry("1.4.2")),
            ("stale", DependencySource::registry("0.1.0")),
        ]);

        let plan = Resolver::new(&index)
            .with_locked(locked)
            .plan("app", &declared)
            .unwrap();
        let report = plan.validation.unwrap();
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(plan.dependencies.get("http"), Some(&DependencySource::registry("1.4.2")));
    }

    #[test]
    fn plan_manifest_uses_package_name() {
        let manifest = Manifest::parse(
            r#"
[package]
name = "site"
version = "0.3.0"

[dependencies]
http = "2.0.0"
"#,
        )
        .unwrap();
        let index = index();
        let plan = Resolver::new(&index).plan_manifest(&manifest).unwrap();
        assert_eq!(plan.build_order, vec!["http", "site"]);
    }

    fn write_manifest(dir: &Path, name: &str, deps: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let text = format!("[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n\n[dependencies]\n{deps}");
        std::fs::write(dir.join(MANIFEST_FILE), text).unwrap();
    }

    #[test]
    fn path_dependency_manifests_extend_the_build_graph() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir.path().join("vendor/theme"),
            "theme",
            "http = \"1.0.0\"\nicons = { path = \"../icons\" }\n",
        );
        write_manifest(&dir.path().join("vendor/icons"), "icons", "");

        let index = index();
        let declared = deps(&[
            ("http", DependencySource::registry(">=1.0")),
            (
                "theme",
                DependencySource::Path {
                    path: "vendor/theme".to_string(),
                    hash: None,
                },
            ),
        ]);

        let resolver = Resolver::new(&index).with_project_dir(dir.path());
        let plan = resolver.plan("app", &declared).unwrap();
        assert_eq!(plan.build_order, vec!["icons", "http", "theme", "app"]);

        let graph = resolver.build_graph("app", &plan.dependencies).unwrap();
        assert_eq!(
            graph.dependencies("theme"),
            Some(&["http".to_string(), "icons".to_string()][..])
        );
        assert_eq!(graph.dependencies("icons"), Some(&[][..]));
        assert!(!plan.dependencies.contains("icons"));
    }

    #[test]
    fn path_dependency_graph_needs_project_dir() {
        let index = index();
        let declared = deps(&[(
            "theme",
            DependencySource::Path {
                path: "vendor/theme".to_string(),
                hash: None,
            },
        )]);
        let graph = Resolver::new(&index).build_graph("app", &declared).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.topological_order().unwrap(), vec!["theme", "app"]);
    }

    #[test]
    fn path_dependency_cycle_fails_the_plan() {
        let dir = TempDir::new().unwrap();
        write_manifest(&dir.path().join("a"), "a", "b = { path = \"../b\" }\n");
        write_manifest(&dir.path().join("b"), "b", "a = { path = \"../a\" }\n");

        let index = index();
        let declared = deps(&[(
            "a",
            DependencySource::Path {
                path: "a".to_string(),
                hash: None,
            },
        )]);
        let err = Resolver::new(&index)
            .with_project_dir(dir.path())
            .plan("app", &declared)
            .unwrap_err();
        match err {
            PlanError::Cycle(cycle) => assert_eq!(cycle.cycle, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_path_dependency_manifest_names_its_file() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "[package]\n").unwrap();

        let index = index();
        let declared = deps(&[(
            "broken",
            DependencySource::Path {
                path: "broken".to_string(),
                hash: None,
            },
        )]);
        let err = Resolver::new(&index)
            .with_project_dir(dir.path())
            .plan("app", &declared)
            .unwrap_err();
        assert!(
            matches!(err, PlanError::Manifest { ref path, .. } if path.ends_with(MANIFEST_FILE))
        );
    }

    #[test]
    fn path_dependency_to_a_file_stays_unhashed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("single.qr"), "fn main() {}").unwrap();

        let index = index();
        let declared = deps(&[(
            "single",
            DependencySource::Path {
                path: "single.qr".to_string(),
                hash: None,
            },
        )]);
        let resolved = Resolver::new(&index)
            .with_project_dir(dir.path())
            .resolve(&declared)
            .unwrap();
        assert_eq!(resolved, declared);
    }
}
