// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Firmware self-update client
//!
//! Looks up the newest release published on GitHub (or any server following
//! the same layout), compares its version with the running firmware and, when
//! it is newer, downloads and installs the image and restarts into it.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod installer;
pub mod location;
pub mod observer;
pub mod resolver;
pub mod restart;
pub mod transfer;
pub mod updater;
pub mod version;

pub use config::{ResolutionStrategy, UpdaterConfig};
pub use error::{Result, UpdaterError};
pub use location::ResolvedBaseLocation;
pub use resolver::ReleaseLocationResolver;
pub use transfer::{FirmwareTransferDriver, TransferOutcome};
pub use updater::{CycleState, FirmwareUpdater, UpdateOutcome};
pub use version::{SemanticVersion, is_update_required, version_from_tag};
