// SPDX-License-Identifier: MIT OR Apache-2.0
//! Progress events broadcast while a job runs.

use crate::{JobState, ResultState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of a job's counters, published to the progress bus after every
/// recorded result and once more when the job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job this event describes.
    pub job_id: Uuid,
    /// Devices selected for the job.
    pub total: u32,
    /// Successful devices so far.
    pub completed: u32,
    /// Failed devices so far.
    pub failed: u32,
    /// Job state at publish time.
    pub state: JobState,
    /// Hostname of the device whose result triggered this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<String>,
    /// Outcome of that device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ResultState>,
}

impl ProgressEvent {
    /// Initial snapshot for a freshly created job.
    #[must_use]
    pub fn initial(job_id: Uuid, total: u32) -> Self {
        Self {
            job_id,
            total,
            completed: 0,
            failed: 0,
            state: JobState::Running,
            last_device: None,
            last_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_is_running_with_zero_counters() {
        let ev = ProgressEvent::initial(Uuid::nil(), 7);
        assert_eq!(ev.total, 7);
        assert_eq!((ev.completed, ev.failed), (0, 0));
        assert_eq!(ev.state, JobState::Running);
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let json = serde_json::to_value(ProgressEvent::initial(Uuid::nil(), 1)).unwrap();
        assert!(json.get("last_device").is_none());
        assert!(json.get("last_status").is_none());
    }
}
