// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain model for the confvault backup engine.
//!
//! This crate defines the entities shared by every other crate in the
//! workspace — platforms, sites, devices, credential sets, jobs, per-device
//! results — together with the flat device-error taxonomy and the progress
//! event shape broadcast while a job runs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod error;
mod event;
mod job;
mod model;
mod outcome;
mod platform;

pub use cancel::CancellationToken;
pub use error::{DeviceError, ErrorKind};
pub use event::ProgressEvent;
pub use job::{BackupResult, Job, JobState, ResultState};
pub use model::{CredentialSet, Device, DeviceContext, Site};
pub use outcome::{DeviceOutcome, OutcomePayload};
pub use platform::{Platform, Transport, UnknownPlatform};

use sha2::{Digest, Sha256};

/// Compute the lowercase hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
