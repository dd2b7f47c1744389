// src/version/mod.rs

//! Release version handling for update binaries
//!
//! Versions are compared segment by segment: split on `.`, compare the
//! numeric value of each shared segment left to right, first difference
//! wins. When every shared segment is equal the version with more segments
//! is greater, so `1.2.0 > 1.2`. Segments that are not plain numbers parse
//! as 0; this is deliberately permissive and never an error.

use std::cmp::Ordering;
use std::fmt;

/// A parsed release version
#[derive(Debug, Clone, Eq)]
pub struct ReleaseVersion {
    raw: String,
    segments: Vec<u64>,
}

impl ReleaseVersion {
    /// Parse a version string, stripping an optional leading `v`
    ///
    /// Examples:
    /// - "1.2.3" → [1, 2, 3]
    /// - "v2.0" → [2, 0]
    /// - "1.beta.3" → [1, 0, 3]
    pub fn parse(s: &str) -> Self {
        let raw = normalize(s).to_string();
        let segments = raw
            .split('.')
            .map(|seg| seg.parse::<u64>().unwrap_or(0))
            .collect();
        Self { raw, segments }
    }

    /// The version string without a leading `v`
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric segments as parsed
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(other.segments.iter()) {
            match a.cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.segments.len().cmp(&other.segments.len())
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// Strip a single leading `v` from a version string
pub fn normalize(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Compare two version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    ReleaseVersion::parse(a).cmp(&ReleaseVersion::parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        assert_eq!(ReleaseVersion::parse("1.2.3").segments(), &[1, 2, 3]);
        assert_eq!(ReleaseVersion::parse("v2.0").segments(), &[2, 0]);
        assert_eq!(ReleaseVersion::parse("v2.0").as_str(), "2.0");
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert_eq!(compare_versions("1.10.0", "1.2.0"), Ordering::Greater);
    }

    #[test]
    fn test_more_segments_wins_on_tie() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.2.0", "1.2"), Ordering::Greater);
    }

    #[test]
    fn test_equal() {
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v2.0.0", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_non_numeric_segments_are_zero() {
        assert_eq!(compare_versions("1.beta", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.rc1.2", "1.0.1"), Ordering::Greater);
    }

    #[test]
    fn test_sorting() {
        let mut versions: Vec<ReleaseVersion> = ["1.10.0", "1.2.0", "0.9", "1.2"]
            .iter()
            .map(|v| ReleaseVersion::parse(v))
            .collect();
        versions.sort();
        let sorted: Vec<&str> = versions.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, ["0.9", "1.2", "1.2.0", "1.10.0"]);
    }
}
