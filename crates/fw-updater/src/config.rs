// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Configuration module for the updater

use crate::error::{Result, UpdaterError};
use crate::http::{HttpSettings, TrustAnchor, USER_AGENT};
use crate::version::SemanticVersion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH: &str = "/data/fw_updater_config.json";

fn default_current_version() -> String {
    "0.0.0".to_owned()
}

fn default_firmware_name() -> String {
    "firmware.bin".to_owned()
}

fn default_api_url_field() -> String {
    "html_url".to_owned()
}

fn default_user_agent() -> String {
    USER_AGENT.to_owned()
}

fn default_image_path() -> PathBuf {
    PathBuf::from("/data/firmware.bin")
}

fn default_30() -> u64 {
    30
}

fn default_10() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_image_size() -> u64 {
    64 * 1024 * 1024
}

fn default_3600() -> u64 {
    3600
}

fn default_1000() -> u64 {
    1000
}

/// 2024-01-01T00:00:00Z. A clock behind this cannot validate current certificates.
fn default_min_valid_epoch() -> i64 {
    1_704_067_200
}

/// Which way the release reference is turned into an asset directory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Follow the release URL's redirect to the tagged release.
    Redirect,
    /// Query a releases API endpoint and read the release page URL from JSON.
    #[default]
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Version of the running firmware, "0.0.0" when unknown
    #[serde(default = "default_current_version")]
    pub current_version: String,

    /// Release reference: API endpoint or redirecting release URL
    pub release_url: String,

    /// Name of the firmware asset inside the release directory
    #[serde(default = "default_firmware_name")]
    pub firmware_name: String,

    /// "api" (default) or "redirect"
    #[serde(default)]
    pub strategy: ResolutionStrategy,

    /// JSON field holding the release page URL (API strategy)
    #[serde(default = "default_api_url_field")]
    pub api_url_field: String,

    /// PEM file with the pinned trust anchor; built-in roots when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_anchor_pem: Option<PathBuf>,

    /// Disable certificate verification (development only)
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_30")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_10")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Largest firmware image accepted (bytes)
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u64,

    /// Path of the active image replaced on install
    #[serde(default = "default_image_path")]
    pub image_path: PathBuf,

    /// How often the agent runs a check cycle (seconds)
    #[serde(default = "default_3600")]
    pub check_interval_secs: u64,

    /// Pause between a successful install and the restart (milliseconds)
    #[serde(default = "default_1000")]
    pub settle_delay_ms: u64,

    /// Earliest plausible wall-clock time (unix seconds)
    #[serde(default = "default_min_valid_epoch")]
    pub min_valid_epoch_secs: i64,

    /// How long to wait for the clock to become plausible
    #[serde(default = "default_30")]
    pub clock_sync_timeout_secs: u64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            current_version: default_current_version(),
            release_url: String::new(),
            firmware_name: default_firmware_name(),
            strategy: ResolutionStrategy::default(),
            api_url_field: default_api_url_field(),
            trust_anchor_pem: None,
            insecure: false,
            user_agent: default_user_agent(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: default_max_redirects(),
            max_image_size: default_max_image_size(),
            image_path: default_image_path(),
            check_interval_secs: 3600,
            settle_delay_ms: 1000,
            min_valid_epoch_secs: default_min_valid_epoch(),
            clock_sync_timeout_secs: 30,
        }
    }
}

impl UpdaterConfig {
    pub fn new(
        current_version: impl Into<String>,
        release_url: impl Into<String>,
        firmware_name: impl Into<String>,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            current_version: current_version.into(),
            release_url: release_url.into(),
            firmware_name: firmware_name.into(),
            strategy,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.release_url.trim().is_empty() {
            return Err(UpdaterError::Config("release_url must be set".to_owned()));
        }
        if self.firmware_name.trim().is_empty() {
            return Err(UpdaterError::Config("firmware_name must be set".to_owned()));
        }
        if !is_plain_file_name(&self.firmware_name) {
            return Err(UpdaterError::Config(format!(
                "firmware_name must be a plain file name, got {:?}",
                self.firmware_name
            )));
        }
        if self.strategy == ResolutionStrategy::Api && self.api_url_field.trim().is_empty() {
            return Err(UpdaterError::Config("api_url_field must be set".to_owned()));
        }
        if self.insecure && self.trust_anchor_pem.is_some() {
            return Err(UpdaterError::Config(
                "insecure and trust_anchor_pem are mutually exclusive".to_owned(),
            ));
        }
        Ok(())
    }

    /// The running version; unparseable values degrade to 0.0.0.
    pub fn current_semver(&self) -> SemanticVersion {
        let version = SemanticVersion::parse(&self.current_version);
        if version.is_valid() {
            version
        } else {
            tracing::warn!(
                "Current version {:?} is not a semantic version, assuming 0.0.0",
                self.current_version
            );
            SemanticVersion::zero()
        }
    }

    pub fn trust_anchor(&self) -> Result<TrustAnchor> {
        if self.insecure {
            return Ok(TrustAnchor::Insecure);
        }
        match &self.trust_anchor_pem {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    UpdaterError::Config(format!(
                        "Failed to read trust anchor {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(TrustAnchor::Pinned(pem))
            }
            None => Ok(TrustAnchor::BuiltInRoots),
        }
    }

    pub fn http_settings(&self) -> Result<HttpSettings> {
        Ok(HttpSettings {
            trust_anchor: self.trust_anchor()?,
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_redirects: self.max_redirects,
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// A single path segment that joins onto the release directory unchanged
fn is_plain_file_name(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '?', '#', '%'])
}

pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| UpdaterError::Config(format!("Failed to parse config: {e}")))
    } else {
        // Create with defaults so the operator has a file to fill in
        let config = UpdaterConfig::default();
        save_config(path, &config)?;
        Ok(config)
    }
}

pub fn save_config(path: &Path, config: &UpdaterConfig) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::default();
        assert_eq!(config.strategy, ResolutionStrategy::Api);
        assert_eq!(config.firmware_name, "firmware.bin");
        assert_eq!(config.api_url_field, "html_url");
        assert!(!config.insecure);
        assert!(config.trust_anchor_pem.is_none());
        assert_eq!(config.check_interval_secs, 3600);
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config: UpdaterConfig = serde_json::from_str(
            r#"{"release_url": "https://api.github.com/repos/org/device/releases/latest"}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::Api);
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.current_version, "0.0.0");
        assert_eq!(config.current_semver(), SemanticVersion::zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strategy_is_lowercase() {
        let config: UpdaterConfig = serde_json::from_str(
            r#"{"release_url": "https://github.com/org/device/releases/latest", "strategy": "redirect"}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, ResolutionStrategy::Redirect);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = UpdaterConfig::default();
        assert!(config.validate().is_err());

        config.release_url = "https://example.com/releases/latest".to_owned();
        assert!(config.validate().is_ok());

        for name in [
            "bin/firmware.bin",
            "firmware.bin?raw=1",
            "firmware.bin#part",
            "..",
            ".",
            "..\\firmware.bin",
            "%2e%2e",
        ] {
            config.firmware_name = name.to_owned();
            assert!(config.validate().is_err(), "{name:?} accepted");
        }

        config.firmware_name = "device-v2.bin".to_owned();
        assert!(config.validate().is_ok());

        config.firmware_name = "firmware.bin".to_owned();
        config.insecure = true;
        config.trust_anchor_pem = Some(PathBuf::from("/etc/ca.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_current_version_degrades_to_zero() {
        let mut config = UpdaterConfig::default();
        config.current_version = "dev-build".to_owned();
        assert_eq!(config.current_semver(), SemanticVersion::zero());

        config.current_version = "v1.2.0".to_owned();
        assert_eq!(config.current_semver().to_string(), "1.2.0");
    }

    #[test]
    fn test_insecure_is_explicit() {
        let mut config = UpdaterConfig::default();
        assert_eq!(config.trust_anchor().unwrap(), TrustAnchor::BuiltInRoots);

        config.insecure = true;
        assert_eq!(config.trust_anchor().unwrap(), TrustAnchor::Insecure);
    }

    #[test]
    fn test_missing_trust_anchor_file_is_config_error() {
        let config = UpdaterConfig {
            trust_anchor_pem: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(
            config.trust_anchor(),
            Err(UpdaterError::Config(_))
        ));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(config.firmware_name, "firmware.bin");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains(r#""current_version": "0.0.0""#));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let config = UpdaterConfig::new(
            "1.2.0",
            "https://github.com/org/device/releases/latest",
            "device.bin",
            ResolutionStrategy::Redirect,
        );
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.current_version, "1.2.0");
        assert_eq!(loaded.firmware_name, "device.bin");
        assert_eq!(loaded.strategy, ResolutionStrategy::Redirect);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_config(&path), Err(UpdaterError::Config(_))));
    }
}
