// SPDX-License-Identifier: MIT OR Apache-2.0
//! The contract between transport pools and the orchestrator.

use crate::DeviceError;
use uuid::Uuid;

/// What a transport pool produced for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomePayload {
    /// Raw configuration text as returned by the device.
    Config(String),
    /// The device failed; carries the taxonomy kind.
    Failed(DeviceError),
    /// The device was still queued when the job was cancelled.
    Skipped,
}

/// One device's terminal transport outcome, streamed from a pool to the
/// orchestrator's funnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    /// Device the outcome belongs to.
    pub device_id: Uuid,
    /// Hostname, carried for result rows and progress events.
    pub hostname: String,
    /// What happened.
    pub payload: OutcomePayload,
    /// Wall-clock duration of the attempt. Zero for skipped devices.
    pub duration_ms: u64,
}

impl DeviceOutcome {
    /// Shorthand for a skipped device.
    #[must_use]
    pub fn skipped(device_id: Uuid, hostname: impl Into<String>) -> Self {
        Self {
            device_id,
            hostname: hostname.into(),
            payload: OutcomePayload::Skipped,
            duration_ms: 0,
        }
    }
}
