// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Resolved release asset directories

use crate::error::{Result, UpdaterError};
use crate::version::SemanticVersion;
use reqwest::Url;
use std::fmt;

/// Directory-like URL under which a release's firmware binary lives.
///
/// Always ends in `/`. By convention the last path segment is the release
/// version (e.g. `https://github.com/org/repo/releases/download/v1.3.0/`),
/// which is how the candidate version is derived without a second request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBaseLocation {
    url: Url,
}

impl ResolvedBaseLocation {
    /// Build a base location from an absolute URL, appending the trailing `/`
    /// if it is missing.
    pub fn new(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(UpdaterError::Resolution("empty location".to_owned()));
        }

        let mut url = Url::parse(location)
            .map_err(|e| UpdaterError::Resolution(format!("invalid location {location:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(UpdaterError::Resolution(format!(
                "location {location:?} is not a hierarchical URL"
            )));
        }
        url.set_query(None);
        url.set_fragment(None);

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let location = Self { url };
        if location.version_segment().is_empty() {
            return Err(UpdaterError::Resolution(format!(
                "location {} has no release directory",
                location.url
            )));
        }
        Ok(location)
    }

    /// Convert a release page URL (`.../releases/tag/<tag>`) into the asset
    /// download directory (`.../releases/download/<tag>/`).
    pub fn from_release_page(page_url: &str) -> Result<Self> {
        Self::new(&release_page_to_download_dir(page_url))
    }

    /// The trailing path segment, i.e. the release directory name.
    pub fn version_segment(&self) -> &str {
        self.url
            .path()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Parse the release directory name as the candidate version.
    pub fn candidate_version(&self) -> Result<SemanticVersion> {
        let segment = self.version_segment();
        let version = SemanticVersion::parse(segment);
        if version.is_valid() {
            Ok(version)
        } else {
            Err(UpdaterError::VersionSegment {
                segment: segment.to_owned(),
            })
        }
    }

    /// Full download URL of `firmware_name` inside this directory.
    pub fn firmware_url(&self, firmware_name: &str) -> Result<Url> {
        self.url.join(firmware_name).map_err(|e| {
            UpdaterError::Config(format!("invalid firmware name {firmware_name:?}: {e}"))
        })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ResolvedBaseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// GitHub serves the release page under `/tag/` and the assets under `/download/`.
fn release_page_to_download_dir(page_url: &str) -> String {
    let page_url = page_url.trim();
    let rewritten = page_url.replacen("/releases/tag/", "/releases/download/", 1);
    if rewritten.ends_with('/') {
        rewritten
    } else {
        format!("{rewritten}/")
    }
}
