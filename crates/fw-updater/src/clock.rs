// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Wall-clock readiness for certificate validation

use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Makes sure the system time is usable before TLS handshakes.
#[async_trait]
pub trait ClockSync: Send + Sync {
    async fn synchronize(&self) -> Result<()>;
}

/// Waits for an external time source (NTP daemon, RTC driver) to bring the
/// clock past a plausible minimum.
#[derive(Debug, Clone)]
pub struct PlausibleClock {
    min_valid: DateTime<Utc>,
    timeout: Duration,
}

impl PlausibleClock {
    pub fn new(min_valid_epoch_secs: i64, timeout: Duration) -> Self {
        let min_valid = DateTime::from_timestamp(min_valid_epoch_secs, 0).unwrap_or_default();
        Self { min_valid, timeout }
    }

    pub fn is_plausible(&self, now: DateTime<Utc>) -> bool {
        now >= self.min_valid
    }
}

#[async_trait]
impl ClockSync for PlausibleClock {
    async fn synchronize(&self) -> Result<()> {
        let started = Instant::now();
        loop {
            let now = Utc::now();
            if self.is_plausible(now) {
                debug!("System time: {}", now.to_rfc3339());
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                return Err(UpdaterError::ClockUnsynchronized {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            info!("Waiting for system time synchronization...");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plausible_clock_passes_immediately() {
        let clock = PlausibleClock::new(0, Duration::from_secs(1));
        assert!(clock.synchronize().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_clock_times_out() {
        // Year 9999: the host clock never gets there
        let clock = PlausibleClock::new(253_402_300_799, Duration::from_secs(2));

        match clock.synchronize().await {
            Err(UpdaterError::ClockUnsynchronized { waited_secs }) => assert!(waited_secs >= 2),
            other => panic!("expected ClockUnsynchronized, got {other:?}"),
        }
    }

    #[test]
    fn test_is_plausible() {
        let clock = PlausibleClock::new(1_704_067_200, Duration::from_secs(1));
        assert!(!clock.is_plausible(DateTime::from_timestamp(0, 0).unwrap()));
        assert!(clock.is_plausible(DateTime::from_timestamp(1_704_067_200, 0).unwrap()));
    }
}
