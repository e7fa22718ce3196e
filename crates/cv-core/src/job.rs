// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backup jobs and per-device results.

use crate::DeviceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The job is executing; counters are moving.
    Running,
    /// Every selected device has a terminal result. Reached even when all
    /// devices failed or the job was cancelled mid-flight.
    Complete,
    /// Catastrophic orchestrator error before per-device work could run.
    Failed,
}

impl JobState {
    /// Returns `true` if this state will never change again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Valid successor states.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [JobState] {
        match self {
            Self::Running => &[Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => &[],
        }
    }
}

/// One backup job over a selected set of devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: Uuid,
    /// When the job was requested.
    pub triggered_at: DateTime<Utc>,
    /// Who requested it.
    pub triggered_by: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Number of devices selected at creation time.
    pub total: u32,
    /// Devices with a successful commit. Monotonic.
    pub completed: u32,
    /// Devices with a recorded failure. Monotonic.
    pub failed: u32,
    /// When the orchestrator began per-device work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the job reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Devices skipped by cancellation. Only meaningful once the job is
    /// terminal, when `completed + failed + skipped == total` holds.
    #[must_use]
    pub fn skipped(&self) -> u32 {
        self.total.saturating_sub(self.completed + self.failed)
    }
}

/// Terminal outcome of one device within one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    /// The configuration was fetched, scrubbed, and committed.
    Success,
    /// The device failed; `error` carries the taxonomy kind.
    Failed,
    /// The device was still queued when the job was cancelled.
    Skipped,
}

/// The outcome row recorded for one `(job, device)` pair. Append-only;
/// created exactly once per device per job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResult {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Device this result describes.
    pub device_id: Uuid,
    /// Device hostname at the time of the backup.
    pub hostname: String,
    /// Terminal outcome.
    pub state: ResultState,
    /// Lowercase hex SHA-256 of the normalized configuration; empty unless
    /// the backup succeeded.
    pub content_hash: String,
    /// Commit identifier returned by the repository service; present iff
    /// the backup succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Failure details; present iff the backup failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DeviceError>,
    /// Wall-clock duration of the device's backup attempt.
    pub duration_ms: u64,
    /// When the result was recorded.
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_is_not_terminal() {
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn terminal_states_have_no_successors() {
        assert!(JobState::Complete.valid_transitions().is_empty());
        assert!(JobState::Failed.valid_transitions().is_empty());
        assert_eq!(
            JobState::Running.valid_transitions(),
            &[JobState::Complete, JobState::Failed]
        );
    }

    #[test]
    fn skipped_accounts_for_the_remainder() {
        let job = Job {
            id: Uuid::nil(),
            triggered_at: Utc::now(),
            triggered_by: "api".into(),
            state: JobState::Complete,
            total: 100,
            completed: 15,
            failed: 5,
            started_at: None,
            completed_at: Some(Utc::now()),
        };
        assert_eq!(job.skipped(), 80);
        assert_eq!(job.completed + job.failed + job.skipped(), job.total);
    }

    #[test]
    fn job_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&ResultState::Skipped).unwrap(),
            "\"skipped\""
        );
    }
}
