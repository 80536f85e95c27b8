// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Release location resolution: redirect probing and releases API queries

use crate::config::{ResolutionStrategy, UpdaterConfig};
use crate::error::{Result, UpdaterError};
use crate::http::{HttpSettings, build_client, build_client_with_redirects};
use crate::location::ResolvedBaseLocation;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Turns the configured release reference into a base location.
///
/// The strategy is fixed at construction; every `resolve` call performs a
/// fresh lookup and never retries internally.
#[derive(Debug, Clone)]
pub enum ReleaseLocationResolver {
    Redirect(RedirectResolver),
    Api(ApiResolver),
}

impl ReleaseLocationResolver {
    pub fn redirect(release_url: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        Ok(Self::Redirect(RedirectResolver::new(release_url, settings)?))
    }

    pub fn api(release_url: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        Ok(Self::Api(ApiResolver::new(release_url, settings)?))
    }

    pub fn from_config(config: &UpdaterConfig, settings: &HttpSettings) -> Result<Self> {
        match config.strategy {
            ResolutionStrategy::Redirect => Self::redirect(config.release_url.clone(), settings),
            ResolutionStrategy::Api => Ok(Self::Api(
                ApiResolver::new(config.release_url.clone(), settings)?
                    .with_url_field(config.api_url_field.clone()),
            )),
        }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        match self {
            Self::Redirect(_) => ResolutionStrategy::Redirect,
            Self::Api(_) => ResolutionStrategy::Api,
        }
    }

    pub async fn resolve(&self) -> Result<ResolvedBaseLocation> {
        match self {
            Self::Redirect(resolver) => resolver.resolve().await,
            Self::Api(resolver) => resolver.resolve().await,
        }
    }
}

/// Resolves by following the release URL's redirects without fetching bodies.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    client: Client,
    release_url: String,
    max_redirects: usize,
}

impl RedirectResolver {
    pub fn new(release_url: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(settings)?,
            release_url: release_url.into(),
            max_redirects: settings.max_redirects,
        })
    }

    pub async fn resolve(&self) -> Result<ResolvedBaseLocation> {
        let mut current = parse_url(&self.release_url)?;
        let mut hops = 0;

        loop {
            let response = self
                .client
                .head(current.clone())
                .send()
                .await
                .map_err(|e| UpdaterError::from_transport(&e, UpdaterError::Resolution))?;

            let status = response.status();
            if !is_redirect(status) {
                if hops == 0 {
                    return Err(UpdaterError::Resolution(format!(
                        "{current} did not redirect (status {status})"
                    )));
                }
                if !status.is_success() {
                    return Err(UpdaterError::Resolution(format!(
                        "redirect chain ended at {current} with status {status}"
                    )));
                }
                debug!("Redirect chain ended at {current} with status {status}");
                break;
            }

            if hops == self.max_redirects {
                return Err(UpdaterError::Resolution(format!(
                    "more than {} redirects from {}",
                    self.max_redirects, self.release_url
                )));
            }

            let next = redirect_target(&current, &response)?;
            debug!("Redirect {status}: {current} -> {next}");
            current = next;
            hops += 1;
        }

        ResolvedBaseLocation::from_release_page(current.as_str())
    }
}

/// Resolves by reading the release page URL out of a releases API response.
#[derive(Debug, Clone)]
pub struct ApiResolver {
    client: Client,
    release_url: String,
    url_field: String,
}

impl ApiResolver {
    pub fn new(release_url: impl Into<String>, settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            client: build_client_with_redirects(settings)?,
            release_url: release_url.into(),
            url_field: "html_url".to_owned(),
        })
    }

    /// Read the release page URL from a different JSON field
    pub fn with_url_field(mut self, field: impl Into<String>) -> Self {
        self.url_field = field.into();
        self
    }

    pub async fn resolve(&self) -> Result<ResolvedBaseLocation> {
        let url = parse_url(&self.release_url)?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, GITHUB_JSON)
            .send()
            .await
            .map_err(|e| UpdaterError::from_transport(&e, UpdaterError::Resolution))?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_owned());
            return Err(UpdaterError::Resolution(format!(
                "release API error {status}: {body}"
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| UpdaterError::Resolution(format!("Failed to parse response: {e}")))?;

        let page_url = document
            .get(&self.url_field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                UpdaterError::Resolution(format!(
                    "response has no string field {:?}",
                    self.url_field
                ))
            })?;

        debug!("Release page: {page_url}");
        ResolvedBaseLocation::from_release_page(page_url)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| UpdaterError::Resolution(format!("invalid release URL {raw:?}: {e}")))
}

// 304 is 3xx but carries no Location
fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn redirect_target(current: &Url, response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| {
            UpdaterError::Resolution(format!("{current} redirected without a Location header"))
        })?
        .to_str()
        .map_err(|_| UpdaterError::Resolution("Location header is not valid text".to_owned()))?;

    current
        .join(location)
        .map_err(|e| UpdaterError::Resolution(format!("invalid Location {location:?}: {e}")))
}
