// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Firmware download and install transaction

use crate::error::{Result, UpdaterError};
use crate::http::{HttpSettings, build_download_client};
use crate::installer::FirmwareInstaller;
use crate::observer::TransferObserver;
use crate::version::SemanticVersion;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, error, info, warn};

/// Sent with every firmware request so the server can answer 304.
pub const FIRMWARE_VERSION_HEADER: &str = "x-firmware-version";

const DEFAULT_MAX_IMAGE_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The new image is installed and will run after the next restart.
    Success,
    /// Nothing was activated; the reason is also kept as `last_error`.
    Failed(String),
    /// Server answered 304 Not Modified.
    NoUpdatesAvailable,
}

enum Fetched {
    Installed,
    NotModified,
}

/// Downloads a firmware image and feeds it to a [`FirmwareInstaller`].
///
/// Does not restart the device; that is left to the caller.
#[derive(Debug, Clone)]
pub struct FirmwareTransferDriver {
    client: Client,
    max_image_size: u64,
    last_error: Option<String>,
}

impl FirmwareTransferDriver {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            client: build_download_client(settings)?,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            last_error: None,
        })
    }

    pub fn with_max_image_size(mut self, bytes: u64) -> Self {
        self.max_image_size = bytes;
        self
    }

    /// Human-readable reason of the most recent failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn update(
        &mut self,
        url: &Url,
        current_version: &SemanticVersion,
        installer: &mut dyn FirmwareInstaller,
        observer: &dyn TransferObserver,
    ) -> TransferOutcome {
        info!("Download URL: {url}");
        self.last_error = None;

        let outcome = match self.fetch(url, current_version, installer, observer).await {
            Ok(Fetched::Installed) => TransferOutcome::Success,
            Ok(Fetched::NotModified) => TransferOutcome::NoUpdatesAvailable,
            Err(e) => {
                let reason = e.to_string();
                observer.on_error(&reason);
                self.last_error = Some(reason.clone());
                TransferOutcome::Failed(reason)
            }
        };

        match &outcome {
            TransferOutcome::Success => info!("HTTP update OK"),
            TransferOutcome::NoUpdatesAvailable => info!("HTTP update: no updates"),
            TransferOutcome::Failed(reason) => error!("HTTP update failed: {reason}"),
        }
        outcome
    }

    async fn fetch(
        &self,
        url: &Url,
        current_version: &SemanticVersion,
        installer: &mut dyn FirmwareInstaller,
        observer: &dyn TransferObserver,
    ) -> Result<Fetched> {
        let response = self
            .client
            .get(url.clone())
            .header(FIRMWARE_VERSION_HEADER, current_version.to_string())
            .send()
            .await
            .map_err(|e| UpdaterError::from_transport(&e, UpdaterError::Transfer))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(UpdaterError::Transfer(format!("HTTP error {status}")));
        }

        let total = response.content_length();
        match total {
            Some(0) => {
                return Err(UpdaterError::Transfer(
                    "server reported an empty image".to_owned(),
                ));
            }
            Some(size) if size > self.max_image_size => {
                return Err(UpdaterError::Transfer(format!(
                    "image of {size} bytes exceeds the {} byte limit",
                    self.max_image_size
                )));
            }
            Some(size) => debug!("Image size: {size} bytes"),
            None => warn!("Server did not report the image size"),
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE)
            && content_type != "application/octet-stream"
        {
            warn!("Unexpected content type: {content_type:?}");
        }

        observer.on_start();
        if let Err(e) = installer.begin(total).await {
            installer.abort().await;
            return Err(e);
        }

        if let Err(e) = self.stream_image(response, total, installer, observer).await {
            installer.abort().await;
            return Err(e);
        }

        observer.on_end();
        Ok(Fetched::Installed)
    }

    async fn stream_image(
        &self,
        response: Response,
        total: Option<u64>,
        installer: &mut dyn FirmwareInstaller,
        observer: &dyn TransferObserver,
    ) -> Result<()> {
        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| UpdaterError::from_transport(&e, UpdaterError::Transfer))?;

            received += chunk.len() as u64;
            if received > self.max_image_size {
                return Err(UpdaterError::Transfer(format!(
                    "image exceeds the {} byte limit",
                    self.max_image_size
                )));
            }

            installer.write(&chunk).await?;
            observer.on_progress(received, total);
        }

        if received == 0 {
            return Err(UpdaterError::Transfer("received 0 bytes".to_owned()));
        }
        if let Some(total) = total
            && received != total
        {
            return Err(UpdaterError::Transfer(format!(
                "connection closed after {received} of {total} bytes"
            )));
        }

        installer.finish().await
    }
}
