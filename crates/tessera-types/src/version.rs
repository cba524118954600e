//! Version identifiers and selectors.
//!
//! A [`Version`] is an opaque label such as `"3"` or `"2024-05-rc1"`. Versions
//! assigned by the registry are decimal integers; callers may pick their own.
//!
//! Labels made only of dot-separated integers (`"3"`, `"1.0"`, `"1.10"`) are
//! numeric and compare part by part, so `1.9 < 1.10`. Numeric labels sort
//! before text labels, and text labels compare lexicographically.
//!
//! Version order is for listing only. "Latest" means the most recently
//! committed version, which the registry tracks through
//! [`Metadata::sequence`](crate::Metadata::sequence).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};

/// Selector word meaning "every version".
pub const ALL: &str = "all";

/// Selector word meaning "the most recently committed version".
pub const LATEST: &str = "latest";

/// Validate a version label.
pub fn validate_version(version: &str) -> Result<()> {
    let invalid = |reason: &str| TypesError::InvalidVersion {
        version: version.to_string(),
        reason: reason.to_string(),
    };

    if version.is_empty() {
        return Err(invalid("version must not be empty"));
    }
    if version == ALL || version == LATEST {
        return Err(invalid("reserved selector word"));
    }
    if version.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if let Some(ch) = version
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(invalid(&format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

/// A validated version label.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Parse and validate a version label.
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self(version))
    }

    /// The first version the registry assigns to a fresh name.
    pub fn initial() -> Self {
        Self("1".to_string())
    }

    /// Build a version from a sequence number.
    pub fn from_number(n: u64) -> Self {
        Self(n.to_string())
    }

    /// The numeric value, when the label is a plain decimal integer.
    pub fn as_number(&self) -> Option<u64> {
        if self.0.bytes().all(|b| b.is_ascii_digit()) {
            self.0.parse().ok()
        } else {
            None
        }
    }

    /// The dot-separated integer parts, when every part is one.
    ///
    /// `"1.10"` gives `[1, 10]`; `"rc-1"`, `"1."` and `"1..2"` give `None`.
    pub fn numeric_parts(&self) -> Option<Vec<u64>> {
        self.0
            .split('.')
            .map(|part| {
                if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                    part.parse().ok()
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Next auto-assigned version after the given existing versions.
    ///
    /// One past the greatest leading part of any numeric label, so `"1.0"`
    /// is followed by `"2"`. Text labels are ignored; an empty history
    /// yields `"1"`.
    pub fn next_after<'a>(existing: impl IntoIterator<Item = &'a Version>) -> Self {
        existing
            .into_iter()
            .filter_map(|v| v.numeric_parts()?.first().copied())
            .max()
            .map(|n| Self::from_number(n.saturating_add(1)))
            .unwrap_or_else(Self::initial)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_parts(), other.numeric_parts()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl FromStr for Version {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Version {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Which version(s) an operation targets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    /// The most recently committed version.
    #[default]
    Latest,
    /// One specific version.
    Exact(Version),
    /// Every version of the name (delete only).
    All,
}

impl VersionSelector {
    /// Selector for an optional explicit version, defaulting to latest.
    pub fn from_option(version: Option<Version>) -> Self {
        version.map_or(Self::Latest, Self::Exact)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl From<Version> for VersionSelector {
    fn from(version: Version) -> Self {
        Self::Exact(version)
    }
}

impl FromStr for VersionSelector {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ALL => Ok(Self::All),
            LATEST | "" => Ok(Self::Latest),
            other => Version::new(other).map(Self::Exact),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Exact(v) => write!(f, "{v}"),
            Self::All => f.write_str(ALL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::new(s).unwrap()
    }

    #[test]
    fn valid_versions() {
        assert!(validate_version("1").is_ok());
        assert!(validate_version("1.2.3").is_ok());
        assert!(validate_version("rc-1").is_ok());
    }

    #[test]
    fn reject_reserved_and_malformed() {
        assert!(validate_version("").is_err());
        assert!(validate_version("all").is_err());
        assert!(validate_version("latest").is_err());
        assert!(validate_version("a_b").is_err());
        assert!(validate_version("a/b").is_err());
        assert!(validate_version("..").is_err());
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("2") < v("10"));
        assert!(v("9") < v("10"));
        assert_eq!(v("10").cmp(&v("10")), Ordering::Equal);
    }

    #[test]
    fn dotted_labels_compare_part_by_part() {
        assert!(v("1.9") < v("1.10"));
        assert!(v("1") < v("1.0"));
        assert!(v("1.0") < v("2"));
        assert!(v("2.1") < v("10"));
        let mut sorted = vec![v("1.10"), v("rc-1"), v("2"), v("1.9"), v("1.0")];
        sorted.sort();
        assert_eq!(sorted, vec![v("1.0"), v("1.9"), v("1.10"), v("2"), v("rc-1")]);
    }

    #[test]
    fn malformed_dotted_labels_are_text() {
        assert_eq!(v("1.10").numeric_parts(), Some(vec![1, 10]));
        assert_eq!(v("1.").numeric_parts(), None);
        assert_eq!(v("1..2").numeric_parts(), None);
        assert!(v("999") < v("1."));
    }

    #[test]
    fn numeric_sorts_before_text() {
        assert!(v("100") < v("alpha"));
        assert!(v("alpha") < v("beta"));
    }

    #[test]
    fn next_after_history() {
        assert_eq!(Version::next_after([]), Version::initial());
        let history = [v("1"), v("2"), v("7"), v("release")];
        assert_eq!(Version::next_after(&history), v("8"));
    }

    #[test]
    fn next_after_skips_past_dotted_labels() {
        assert_eq!(Version::next_after(&[v("1.0")]), v("2"));
        assert_eq!(Version::next_after(&[v("1"), v("2"), v("2.5")]), v("3"));
        assert_eq!(Version::next_after(&[v("rc-1")]), v("1"));
    }

    #[test]
    fn selector_parsing() {
        assert_eq!("all".parse::<VersionSelector>().unwrap(), VersionSelector::All);
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!(
            "4".parse::<VersionSelector>().unwrap(),
            VersionSelector::Exact(v("4"))
        );
        assert!("x_y".parse::<VersionSelector>().is_err());
    }

    #[test]
    fn selector_display() {
        assert_eq!(VersionSelector::All.to_string(), "all");
        assert_eq!(VersionSelector::Latest.to_string(), "latest");
        assert_eq!(VersionSelector::Exact(v("5")).to_string(), "5");
    }

    proptest! {
        #[test]
        fn next_is_greater_than_every_numeric(nums in proptest::collection::vec(0u64..10_000, 0..20)) {
            let history: Vec<Version> = nums.iter().map(|n| Version::from_number(*n)).collect();
            let next = Version::next_after(&history);
            for existing in &history {
                prop_assert!(existing < &next);
            }
        }

        #[test]
        fn auto_version_sorts_after_every_numeric_label(
            parts in proptest::collection::vec(proptest::collection::vec(0u64..50, 1..4), 0..12),
        ) {
            let history: Vec<Version> = parts
                .iter()
                .map(|p| v(&p.iter().map(u64::to_string).collect::<Vec<_>>().join(".")))
                .collect();
            let next = Version::next_after(&history);
            for existing in &history {
                prop_assert!(existing < &next);
            }
        }
    }
}
