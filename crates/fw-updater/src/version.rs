// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Version parsing and comparison module

use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// A parsed firmware version.
///
/// Parsing never fails: input that is not a semantic version yields the
/// invalid sentinel, which orders below every valid version (including
/// `0.0.0`). Build metadata is ignored for ordering and equality.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    inner: Option<Version>,
}

impl SemanticVersion {
    /// Parse version strings like "1.2.3", "v1.2.3", "1.2.3-beta.1+build.5".
    pub fn parse(text: &str) -> Self {
        let inner = Version::parse(version_from_tag(text.trim())).ok();
        if inner.is_none() {
            tracing::trace!("Unparseable version string: {text:?}");
        }
        Self { inner }
    }

    /// The invalid sentinel.
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    pub fn zero() -> Self {
        Self {
            inner: Some(Version::new(0, 0, 0)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn as_semver(&self) -> Option<&Version> {
        self.inner.as_ref()
    }
}

impl Default for SemanticVersion {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(version) => write!(f, "{version}"),
            None => f.write_str("invalid"),
        }
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.inner, &other.inner) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            // semver's Prerelease ordering already puts "no pre-release" above any pre-release
            (Some(a), Some(b)) => (a.major, a.minor, a.patch)
                .cmp(&(b.major, b.minor, b.patch))
                .then_with(|| a.pre.cmp(&b.pre)),
        }
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

/// Returns true if `candidate` is strictly newer than `current`.
///
/// An invalid candidate never triggers an update.
pub fn is_update_required(candidate: &SemanticVersion, current: &SemanticVersion) -> bool {
    candidate.is_valid() && candidate > current
}

/// Strip a leading "v" from a release tag
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}
