//! Version parsing, comparison and constraint matching.
//!
//! Versions are compared on their numeric components only. A pre-release
//! suffix is kept for display but ignored when ordering, so `1.0.0-beta`
//! and `1.0.0` compare equal. Lock validation and fingerprints rely on this
//! ordering staying the same.

use std::cmp::Ordering;
use std::fmt;

/// A dependency version.
///
/// Parsing is lenient and never fails: missing or non-numeric components
/// read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    components: Vec<u64>,
    pre: Option<String>,
    raw: String,
}

impl Version {
    /// Parse a version string such as `1.2.3` or `2.0.0-rc.1`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (numeric, pre) = match s.split_once('-') {
            Some((numeric, pre)) => (numeric, Some(pre.to_string())),
            None => (s, None),
        };

        let components = if numeric.is_empty() {
            Vec::new()
        } else {
            numeric.split('.').map(leading_number).collect()
        };

        Self {
            components,
            pre,
            raw: s.to_string(),
        }
    }

    /// Build a version from numeric components.
    #[must_use]
    pub fn from_components(components: &[u64]) -> Self {
        let raw = components
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self {
            components: components.to_vec(),
            pre: None,
            raw,
        }
    }

    /// The numeric components, in order.
    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// The pre-release suffix without its leading `-`.
    #[must_use]
    pub fn pre_release(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    /// The text this version was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compare two versions component-wise.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Read the leading decimal digits of a component, or 0 if there are none.
fn leading_number(component: &str) -> u64 {
    component
        .trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, b| {
            acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
        })
}

/// Compare two versions, treating absent trailing components as zero.
///
/// Pre-release suffixes do not take part in the comparison.
#[must_use]
pub fn compare(a: &Version, b: &Version) -> Ordering {
    let len = a.components.len().max(b.components.len());
    for i in 0..len {
        let left = a.components.get(i).copied().unwrap_or(0);
        let right = b.components.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// A version constraint expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `*`: any version.
    Any,
    /// `>=X`: inclusive lower bound.
    AtLeast(Version),
    /// `~>X.Y[.Z]`: same major and minor. Holds the `"X.Y."` prefix, or
    /// `None` when the expression has fewer than two components.
    Pessimistic(Option<String>),
    /// Any other expression: exact string equality.
    Exact(String),
}

impl Constraint {
    /// Parse a constraint expression. Never fails; unknown forms become
    /// exact matches.
    #[must_use]
    pub fn parse(expr: &str) -> Self {
        if expr == "*" {
            return Self::Any;
        }

        if let Some(min) = expr.strip_prefix(">=") {
            return Self::AtLeast(Version::parse(min.trim_start_matches([' ', '\t'])));
        }

        if let Some(base) = expr.strip_prefix("~>") {
            let base = base.trim_start_matches([' ', '\t']);
            let mut parts = base.split('.');
            let prefix = match (parts.next(), parts.next()) {
                (Some(major), Some(minor)) => Some(format!("{major}.{minor}.")),
                _ => None,
            };
            return Self::Pessimistic(prefix);
        }

        Self::Exact(expr.to_string())
    }

    /// Returns true if `version` satisfies this constraint.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::AtLeast(min) => compare(version, min) != Ordering::Less,
            Self::Pessimistic(Some(prefix)) => version.as_str().starts_with(prefix.as_str()),
            Self::Pessimistic(None) => false,
            Self::Exact(literal) => version.as_str() == literal,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::AtLeast(min) => write!(f, ">={min}"),
            Self::Pessimistic(Some(prefix)) => {
                write!(f, "~>{}", prefix.trim_end_matches('.'))
            }
            Self::Pessimistic(None) => write!(f, "~>"),
            Self::Exact(literal) => f.write_str(literal),
        }
    }
}

/// Returns true if `version` satisfies the constraint expression.
#[must_use]
pub fn satisfies(version: &Version, constraint: &str) -> bool {
    Constraint::parse(constraint).matches(version)
}

/// Select the highest candidate that satisfies `constraint`.
///
/// When several candidates compare equal, the first one wins.
pub fn select<'a, I>(constraint: &str, candidates: I) -> Option<Version>
where
    I: IntoIterator<Item = &'a str>,
{
    let constraint = Constraint::parse(constraint);
    candidates
        .into_iter()
        .map(Version::parse)
        .filter(|v| constraint.matches(v))
        .fold(None, |best: Option<Version>, v| match best {
            Some(b) if compare(&v, &b) != Ordering::Greater => Some(b),
            _ => Some(v),
        })
}

/// Strip a single trailing newline, matching `$` in line-oriented regexes.
fn strip_line_end(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

/// Returns true if `s` is a strict `MAJOR.MINOR.PATCH[-PRE]` version.
#[must_use]
pub fn is_semver(s: &str) -> bool {
    let s = strip_line_end(s);
    let (core, pre) = match s.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (s, None),
    };

    let mut count = 0;
    for part in core.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        count += 1;
    }
    if count != 3 {
        return false;
    }

    match pre {
        None => true,
        Some(pre) => {
            !pre.is_empty()
                && pre
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        }
    }
}

/// Returns true if `name` is a valid package name.
///
/// Names use ASCII letters, digits, `-` and `_`, and must start and end
/// with a letter or digit.
#[must_use]
pub fn is_valid_package_name(name: &str) -> bool {
    let name = strip_line_end(name);
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
}

/// Trim surrounding whitespace and lower-case a name for lookups.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
