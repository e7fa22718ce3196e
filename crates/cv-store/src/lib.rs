// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence interfaces for the backup engine.
//!
//! The relational inventory database is an external collaborator; this
//! crate defines the narrow repository interfaces the engine is written
//! against — [`Inventory`] for device/site/credential reads and
//! [`BackupStore`] for job and result mutation — plus [`MemoryStore`], the
//! in-process implementation backing the daemon default and the test
//! suite.

#![deny(unsafe_code)]

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cv_core::{BackupResult, DeviceContext, Job, JobState};
use uuid::Uuid;

/// Errors from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name, e.g. `"job"`.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: Uuid,
    },
    /// A result row already exists for this `(job, device)` pair.
    #[error("result already recorded for device {device_id} in job {job_id}")]
    DuplicateResult {
        /// Owning job.
        job_id: Uuid,
        /// Offending device.
        device_id: Uuid,
    },
    /// The job already reached a terminal state.
    #[error("job {0} is already terminal")]
    AlreadyTerminal(Uuid),
    /// The store backend failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the device inventory.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Enabled devices matching the intersection of the two selectors,
    /// joined with site and credential set. Both selectors empty selects
    /// every enabled device.
    async fn devices_for_selection(
        &self,
        site_id: Option<Uuid>,
        device_ids: &[Uuid],
    ) -> Result<Vec<DeviceContext>, StoreError>;

    /// One device with its joins, or `None`.
    async fn device_context(&self, device_id: Uuid) -> Result<Option<DeviceContext>, StoreError>;
}

/// Mutation and read access to jobs and per-device results.
///
/// Implementations must make [`record_result`](Self::record_result)
/// reject duplicates per `(job, device)` and keep the counter bumps
/// monotonic; the orchestrator serializes all calls for one job through a
/// single consumer, so no cross-call atomicity beyond that is required.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Insert a freshly created job (state `Running`, counters zero).
    async fn create_job(&self, job: Job) -> Result<(), StoreError>;

    /// Record when per-device work began.
    async fn mark_started(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Append one result row; at most one per `(job, device)`.
    async fn record_result(&self, result: BackupResult) -> Result<(), StoreError>;

    /// Increment the job's completed counter, returning the updated job.
    async fn bump_completed(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Increment the job's failed counter, returning the updated job.
    async fn bump_failed(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Move the job to a terminal state, exactly once.
    async fn finish_job(
        &self,
        job_id: Uuid,
        state: JobState,
        at: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Fetch one job.
    async fn job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Most recently triggered jobs, newest first.
    async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Number of jobs currently in state `Running`.
    async fn running_jobs(&self) -> Result<usize, StoreError>;

    /// All results recorded for one job, in record order.
    async fn job_results(&self, job_id: Uuid) -> Result<Vec<BackupResult>, StoreError>;

    /// A device's most recent results, newest first.
    async fn device_history(
        &self,
        device_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BackupResult>, StoreError>;

    /// Fetch one result row.
    async fn result(&self, result_id: Uuid) -> Result<Option<BackupResult>, StoreError>;

    /// The device's most recent successful result, if any.
    async fn latest_success(&self, device_id: Uuid) -> Result<Option<BackupResult>, StoreError>;
}
