// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the updater crate

use std::error::Error as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network unavailable: {0}")]
    Network(String),

    #[error("certificate validation failed: {0}")]
    Certificate(String),

    #[error("release location could not be resolved: {0}")]
    Resolution(String),

    #[error("release directory segment {segment:?} is not a semantic version")]
    VersionSegment { segment: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("install failed: {0}")]
    Install(String),

    #[error("system clock not synchronized after {waited_secs}s")]
    ClockUnsynchronized { waited_secs: u64 },

    #[error("restart failed: {0}")]
    Restart(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UpdaterError>;

impl UpdaterError {
    /// Classify a transport error: TLS/certificate problems and unreachable
    /// hosts get their own variants, everything else is reported under `fallback`.
    pub fn from_transport(err: &reqwest::Error, fallback: fn(String) -> Self) -> Self {
        if is_certificate_error(err) {
            return Self::Certificate(describe(err));
        }
        if err.is_connect() || err.is_timeout() {
            return Self::Network(describe(err));
        }
        fallback(describe(err))
    }
}

/// Render the full source chain, reqwest's top-level message alone is rarely useful.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("unknownissuer") {
            return true;
        }
        source = cause.source();
    }
    false
}
