// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Firmware image installation

use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Writes a downloaded image into the active boot slot.
///
/// Driven as `begin → write* → finish`. `abort` may be called at any point
/// after `begin` and must leave the currently active image untouched.
#[async_trait]
pub trait FirmwareInstaller: Send {
    /// `size` is the announced image size, if the server sent one.
    async fn begin(&mut self, size: Option<u64>) -> Result<()>;

    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Activate the written image for the next boot.
    async fn finish(&mut self) -> Result<()>;

    async fn abort(&mut self);
}

struct Staging {
    file: File,
    path: PathBuf,
    hasher: Sha256,
    written: u64,
    expected: Option<u64>,
}

/// Installs by staging next to the active image and renaming over it.
pub struct FileInstaller {
    image_path: PathBuf,
    staging: Option<Staging>,
    last_digest: Option<String>,
}

impl std::fmt::Debug for FileInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInstaller")
            .field("image_path", &self.image_path)
            .field("staging", &self.staging.as_ref().map(|s| &s.path))
            .field("last_digest", &self.last_digest)
            .finish()
    }
}

impl FileInstaller {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            staging: None,
            last_digest: None,
        }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// SHA256 (hex) of the last installed image
    pub fn last_digest(&self) -> Option<&str> {
        self.last_digest.as_deref()
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "firmware".to_owned());
        self.image_path.with_file_name(format!("{name}.new"))
    }
}

#[async_trait]
impl FirmwareInstaller for FileInstaller {
    async fn begin(&mut self, size: Option<u64>) -> Result<()> {
        if self.staging.is_some() {
            return Err(UpdaterError::Install(
                "an install is already in progress".to_owned(),
            ));
        }

        if let Some(parent) = self.image_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = self.staging_path();
        let file = File::create(&path).await.map_err(|e| {
            UpdaterError::Install(format!("Failed to create {}: {e}", path.display()))
        })?;
        debug!("Staging firmware image at {}", path.display());

        self.staging = Some(Staging {
            file,
            path,
            hasher: Sha256::new(),
            written: 0,
            expected: size,
        });
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| UpdaterError::Install("write before begin".to_owned()))?;

        let written = staging.written + chunk.len() as u64;
        if let Some(expected) = staging.expected
            && written > expected
        {
            return Err(UpdaterError::Install(format!(
                "image exceeds announced size of {expected} bytes"
            )));
        }

        staging
            .file
            .write_all(chunk)
            .await
            .map_err(|e| UpdaterError::Install(format!("Failed to write image: {e}")))?;
        staging.hasher.update(chunk);
        staging.written = written;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let mut staging = self
            .staging
            .take()
            .ok_or_else(|| UpdaterError::Install("finish before begin".to_owned()))?;

        if let Some(expected) = staging.expected
            && staging.written != expected
        {
            if let Err(e) = tokio::fs::remove_file(&staging.path).await {
                warn!(
                    "Failed to remove staged image {}: {e}",
                    staging.path.display()
                );
            }
            return Err(UpdaterError::Install(format!(
                "image incomplete: {} of {expected} bytes",
                staging.written
            )));
        }

        staging.file.flush().await?;
        staging.file.sync_all().await?;
        drop(staging.file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&staging.path).await?.permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(&staging.path, perms).await?;
        }

        tokio::fs::rename(&staging.path, &self.image_path)
            .await
            .map_err(|e| {
                UpdaterError::Install(format!(
                    "Failed to activate {}: {e}",
                    self.image_path.display()
                ))
            })?;

        let digest = format!("{:x}", staging.hasher.finalize());
        info!(
            "Installed {} bytes to {} (sha256 {digest})",
            staging.written,
            self.image_path.display()
        );
        self.last_digest = Some(digest);
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(staging) = self.staging.take() {
            drop(staging.file);
            if let Err(e) = tokio::fs::remove_file(&staging.path).await {
                warn!(
                    "Failed to remove staged image {}: {e}",
                    staging.path.display()
                );
            }
        }
    }
}
