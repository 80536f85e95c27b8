// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Check-and-install cycle orchestration

use crate::clock::{ClockSync, PlausibleClock};
use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::installer::{FileInstaller, FirmwareInstaller};
use crate::observer::{LogObserver, TransferObserver};
use crate::resolver::ReleaseLocationResolver;
use crate::restart::{ExecRestarter, Restarter};
use crate::transfer::{FirmwareTransferDriver, TransferOutcome};
use crate::version::{SemanticVersion, is_update_required};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CLOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MIN_VALID_EPOCH: i64 = 1_704_067_200;

/// Where the updater currently is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    ResolvingLocation,
    ComparingVersions,
    Transferring,
    /// A new image is active; the restart was requested but this process is
    /// still running.
    Installed,
}

/// Terminal result of one check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    NoUpdateAvailable,
    UpdateAppliedPendingRestart,
    UpdateFailed(String),
    ResolutionFailed,
}

/// Resolve, compare, transfer, restart.
///
/// Each [`handle`](Self::handle) call is a single linear pass. Scheduling
/// cycles is left to the caller.
pub struct FirmwareUpdater {
    current_version: SemanticVersion,
    firmware_name: String,
    resolver: ReleaseLocationResolver,
    driver: FirmwareTransferDriver,
    installer: Box<dyn FirmwareInstaller>,
    observer: Box<dyn TransferObserver>,
    clock: Box<dyn ClockSync>,
    restarter: Box<dyn Restarter>,
    settle_delay: Duration,
    state: CycleState,
}

impl std::fmt::Debug for FirmwareUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareUpdater")
            .field("current_version", &self.current_version)
            .field("firmware_name", &self.firmware_name)
            .field("resolver", &self.resolver)
            .field("settle_delay", &self.settle_delay)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FirmwareUpdater {
    /// Observer, clock and settle delay start at their defaults and can be
    /// replaced with the `with_*` methods.
    pub fn new(
        current_version: SemanticVersion,
        firmware_name: impl Into<String>,
        resolver: ReleaseLocationResolver,
        driver: FirmwareTransferDriver,
        installer: Box<dyn FirmwareInstaller>,
        restarter: Box<dyn Restarter>,
    ) -> Self {
        Self {
            current_version,
            firmware_name: firmware_name.into(),
            resolver,
            driver,
            installer,
            observer: Box::new(LogObserver::new()),
            clock: Box::new(PlausibleClock::new(
                DEFAULT_MIN_VALID_EPOCH,
                DEFAULT_CLOCK_TIMEOUT,
            )),
            restarter,
            settle_delay: DEFAULT_SETTLE_DELAY,
            state: CycleState::Idle,
        }
    }

    pub fn from_config(config: &UpdaterConfig) -> Result<Self> {
        let settings = config.http_settings()?;
        let resolver = ReleaseLocationResolver::from_config(config, &settings)?;
        let driver =
            FirmwareTransferDriver::new(&settings)?.with_max_image_size(config.max_image_size);

        let updater = Self::new(
            config.current_semver(),
            config.firmware_name.clone(),
            resolver,
            driver,
            Box::new(FileInstaller::new(&config.image_path)),
            Box::new(ExecRestarter::with_current_args(&config.image_path)),
        )
        .with_clock(Box::new(PlausibleClock::new(
            config.min_valid_epoch_secs,
            Duration::from_secs(config.clock_sync_timeout_secs),
        )))
        .with_settle_delay(config.settle_delay());

        Ok(updater)
    }

    pub fn with_observer(mut self, observer: Box<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn ClockSync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn current_version(&self) -> &SemanticVersion {
        &self.current_version
    }

    /// Run one check cycle.
    ///
    /// Every failure ends up in the returned outcome. On a successful install
    /// the restarter is invoked and normally does not return.
    pub async fn handle(&mut self) -> UpdateOutcome {
        let outcome = self.run_cycle().await;
        self.state = if outcome == UpdateOutcome::UpdateAppliedPendingRestart {
            CycleState::Installed
        } else {
            CycleState::Idle
        };
        outcome
    }

    async fn run_cycle(&mut self) -> UpdateOutcome {
        // TLS chain validation needs a plausible clock; let the connection
        // fail on its own if it never gets there.
        if let Err(e) = self.clock.synchronize().await {
            warn!("Clock synchronization failed, continuing: {e}");
        }

        self.transition(CycleState::ResolvingLocation);
        let location = match self.resolver.resolve().await {
            Ok(location) => location,
            Err(e) => {
                error!("Failed to resolve release location: {e}");
                return UpdateOutcome::ResolutionFailed;
            }
        };
        info!("Release location: {location}");

        self.transition(CycleState::ComparingVersions);
        let candidate = match location.candidate_version() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("{e}");
                info!("No updates found");
                return UpdateOutcome::NoUpdateAvailable;
            }
        };
        info!(
            "Current version: {}, latest version: {candidate}",
            self.current_version
        );

        if !is_update_required(&candidate, &self.current_version) {
            info!("No updates found");
            return UpdateOutcome::NoUpdateAvailable;
        }

        let url = match location.firmware_url(&self.firmware_name) {
            Ok(url) => url,
            Err(e) => {
                error!("{e}");
                return UpdateOutcome::UpdateFailed(e.to_string());
            }
        };

        self.transition(CycleState::Transferring);
        let transfer = self
            .driver
            .update(
                &url,
                &self.current_version,
                self.installer.as_mut(),
                self.observer.as_ref(),
            )
            .await;

        match transfer {
            TransferOutcome::Failed(reason) => {
                error!("Firmware update failed: {reason}");
                UpdateOutcome::UpdateFailed(reason)
            }
            TransferOutcome::NoUpdatesAvailable => {
                info!("No updates found");
                UpdateOutcome::NoUpdateAvailable
            }
            TransferOutcome::Success => {
                self.transition(CycleState::Installed);
                info!("Update successful, restarting into {candidate}");
                tokio::time::sleep(self.settle_delay).await;

                if let Err(e) = self.restarter.restart().await {
                    error!("Restart failed, new firmware runs after the next reboot: {e}");
                }
                UpdateOutcome::UpdateAppliedPendingRestart
            }
        }
    }

    fn transition(&mut self, next: CycleState) {
        debug!("Update cycle: {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionStrategy;
    use tempfile::TempDir;

    fn config(dir: &TempDir, release_url: &str) -> UpdaterConfig {
        let mut config =
            UpdaterConfig::new("1.2.0", release_url, "firmware.bin", ResolutionStrategy::Api);
        config.image_path = dir.path().join("firmware.bin");
        config.min_valid_epoch_secs = 0;
        config
    }

    #[test]
    fn test_from_config_starts_idle() {
        let dir = TempDir::new().unwrap();
        let updater = FirmwareUpdater::from_config(&config(
            &dir,
            "https://api.github.com/repos/org/device/releases/latest",
        ))
        .unwrap();

        assert_eq!(updater.state(), CycleState::Idle);
        assert_eq!(updater.current_version(), &SemanticVersion::parse("1.2.0"));
    }

    #[test]
    fn test_from_config_degrades_bad_current_version() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, "https://example.com/releases/latest");
        config.current_version = "not-a-version".to_owned();

        let updater = FirmwareUpdater::from_config(&config).unwrap();
        assert_eq!(updater.current_version(), &SemanticVersion::zero());
    }

    #[tokio::test]
    async fn test_unreachable_resolver_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let mut updater =
            FirmwareUpdater::from_config(&config(&dir, "http://127.0.0.1:9/releases/latest"))
                .unwrap();

        assert_eq!(updater.handle().await, UpdateOutcome::ResolutionFailed);
        assert_eq!(updater.state(), CycleState::Idle);
    }
}
