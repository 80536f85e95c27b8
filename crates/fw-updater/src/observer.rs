// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Transfer notifications for the embedding application

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

/// Receives transfer stage notifications.
///
/// Notifications are side effects only; nothing an observer does changes the
/// outcome of a transfer.
pub trait TransferObserver: Send + Sync {
    fn on_start(&self) {}

    /// `total` is `None` when the server did not announce a size.
    fn on_progress(&self, _received: u64, _total: Option<u64>) {}

    fn on_end(&self) {}

    fn on_error(&self, _reason: &str) {}
}

/// Logs every stage, progress in 10% steps.
#[derive(Debug, Default)]
pub struct LogObserver {
    last_decile: AtomicU64,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferObserver for LogObserver {
    fn on_start(&self) {
        self.last_decile.store(0, Ordering::Relaxed);
        info!("Firmware transfer started");
    }

    fn on_progress(&self, received: u64, total: Option<u64>) {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let percent = received.saturating_mul(100).checked_div(total).unwrap_or(0);
        let decile = percent.checked_div(10).unwrap_or(0);
        let previous = self.last_decile.fetch_max(decile, Ordering::Relaxed);
        if decile > previous {
            info!("Firmware transfer: {received}/{total} bytes ({percent}%)");
        }
    }

    fn on_end(&self) {
        info!("Firmware transfer finished");
    }

    fn on_error(&self, reason: &str) {
        error!("Firmware transfer error: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracks_deciles() {
        let observer = LogObserver::new();
        observer.on_start();
        observer.on_progress(50, Some(100));
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 5);

        // Never goes backwards
        observer.on_progress(10, Some(100));
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 5);

        observer.on_progress(100, Some(100));
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_unknown_total_is_ignored() {
        let observer = LogObserver::new();
        observer.on_progress(4096, None);
        observer.on_progress(4096, Some(0));
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_start_resets_progress() {
        let observer = LogObserver::new();
        observer.on_progress(90, Some(100));
        observer.on_start();
        assert_eq!(observer.last_decile.load(Ordering::Relaxed), 0);
    }
}
