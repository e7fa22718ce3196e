// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory store used by the daemon default and the test suite.

use crate::{BackupStore, Inventory, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cv_core::{BackupResult, CredentialSet, Device, DeviceContext, Job, JobState, ResultState, Site};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    sites: HashMap<Uuid, Site>,
    credential_sets: HashMap<Uuid, CredentialSet>,
    devices: HashMap<Uuid, Device>,
    jobs: HashMap<Uuid, Job>,
    /// Append-only, in record order.
    results: Vec<BackupResult>,
}

impl Inner {
    fn context(&self, device: &Device) -> Result<DeviceContext, StoreError> {
        let site = self
            .sites
            .get(&device.site_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "site",
                id: device.site_id,
            })?;
        let credential_set = match device.credential_set_id {
            Some(id) => Some(self.credential_sets.get(&id).cloned().ok_or(
                StoreError::NotFound {
                    entity: "credential set",
                    id,
                },
            )?),
            None => None,
        };
        Ok(DeviceContext {
            device: device.clone(),
            site,
            credential_set,
        })
    }
}

/// Shared in-memory implementation of [`Inventory`] and [`BackupStore`].
///
/// Clones share state; all access goes through one `RwLock`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a site.
    pub async fn upsert_site(&self, site: Site) {
        self.inner.write().await.sites.insert(site.id, site);
    }

    /// Insert or replace a credential set.
    pub async fn upsert_credential_set(&self, set: CredentialSet) {
        self.inner
            .write()
            .await
            .credential_sets
            .insert(set.id, set);
    }

    /// Insert or replace a device.
    pub async fn upsert_device(&self, device: Device) {
        self.inner.write().await.devices.insert(device.id, device);
    }
}

#[async_trait]
impl Inventory for MemoryStore {
    async fn devices_for_selection(
        &self,
        site_id: Option<Uuid>,
        device_ids: &[Uuid],
    ) -> Result<Vec<DeviceContext>, StoreError> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for device in inner.devices.values() {
            if !device.enabled {
                continue;
            }
            if let Some(site) = site_id {
                if device.site_id != site {
                    continue;
                }
            }
            if !device_ids.is_empty() && !device_ids.contains(&device.id) {
                continue;
            }
            out.push(inner.context(device)?);
        }
        // Stable order keeps job totals and test output deterministic.
        out.sort_by(|a, b| a.device.hostname.cmp(&b.device.hostname));
        Ok(out)
    }

    async fn device_context(&self, device_id: Uuid) -> Result<Option<DeviceContext>, StoreError> {
        let inner = self.inner.read().await;
        match inner.devices.get(&device_id) {
            Some(device) => Ok(Some(inner.context(device)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn create_job(&self, job: Job) -> Result<(), StoreError> {
        self.inner.write().await.jobs.insert(job.id, job);
        Ok(())
    }

    async fn mark_started(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        job.started_at = Some(at);
        Ok(())
    }

    async fn record_result(&self, result: BackupResult) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner
            .results
            .iter()
            .any(|r| r.job_id == result.job_id && r.device_id == result.device_id)
        {
            return Err(StoreError::DuplicateResult {
                job_id: result.job_id,
                device_id: result.device_id,
            });
        }
        inner.results.push(result);
        Ok(())
    }

    async fn bump_completed(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        job.completed += 1;
        Ok(job.clone())
    }

    async fn bump_failed(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        job.failed += 1;
        Ok(job.clone())
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        state: JobState,
        at: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        if job.state.is_terminal() {
            return Err(StoreError::AlreadyTerminal(job_id));
        }
        job.state = state;
        job.completed_at = Some(at);
        Ok(job.clone())
    }

    async fn job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn recent_jobs(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn running_jobs(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .count())
    }

    async fn job_results(&self, job_id: Uuid) -> Result<Vec<BackupResult>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .results
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn device_history(
        &self,
        device_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BackupResult>, StoreError> {
        let inner = self.inner.read().await;
        let mut history: Vec<BackupResult> = inner
            .results
            .iter()
            .rev()
            .filter(|r| r.device_id == device_id)
            .take(limit)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(history)
    }

    async fn result(&self, result_id: Uuid) -> Result<Option<BackupResult>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.results.iter().find(|r| r.id == result_id).cloned())
    }

    async fn latest_success(&self, device_id: Uuid) -> Result<Option<BackupResult>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .results
            .iter()
            .rev()
            .find(|r| r.device_id == device_id && r.state == ResultState::Success)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::Platform;

    fn site() -> Site {
        Site {
            id: Uuid::new_v4(),
            code: "nyc".into(),
            name: "New York".into(),
            repo_name: "nyc-configs".into(),
        }
    }

    fn device(site_id: Uuid, hostname: &str, enabled: bool) -> Device {
        Device {
            id: Uuid::new_v4(),
            hostname: hostname.into(),
            address: "192.0.2.10".into(),
            platform: Platform::Ios,
            site_id,
            credential_set_id: None,
            tls_verify: None,
            enabled,
        }
    }

    fn job(total: u32) -> Job {
        Job {
            id: Uuid::new_v4(),
            triggered_at: Utc::now(),
            triggered_by: "test".into(),
            state: JobState::Running,
            total,
            completed: 0,
            failed: 0,
            started_at: None,
            completed_at: None,
        }
    }

    fn result(job_id: Uuid, device_id: Uuid, state: ResultState) -> BackupResult {
        BackupResult {
            id: Uuid::new_v4(),
            job_id,
            device_id,
            hostname: "core-1".into(),
            state,
            content_hash: String::new(),
            commit_id: None,
            error: None,
            duration_ms: 10,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn selection_excludes_disabled_devices() {
        let store = MemoryStore::new();
        let s = site();
        store.upsert_site(s.clone()).await;
        store.upsert_device(device(s.id, "core-1", true)).await;
        store.upsert_device(device(s.id, "core-2", false)).await;

        let devices = store.devices_for_selection(None, &[]).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device.hostname, "core-1");
    }

    #[tokio::test]
    async fn selection_intersects_site_and_ids() {
        let store = MemoryStore::new();
        let nyc = site();
        let lon = Site {
            id: Uuid::new_v4(),
            code: "lon".into(),
            name: "London".into(),
            repo_name: "lon-configs".into(),
        };
        store.upsert_site(nyc.clone()).await;
        store.upsert_site(lon.clone()).await;
        let in_nyc = device(nyc.id, "core-1", true);
        let in_lon = device(lon.id, "core-2", true);
        store.upsert_device(in_nyc.clone()).await;
        store.upsert_device(in_lon.clone()).await;

        let devices = store
            .devices_for_selection(Some(nyc.id), &[in_nyc.id, in_lon.id])
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device.id, in_nyc.id);
    }

    #[tokio::test]
    async fn duplicate_result_is_rejected() {
        let store = MemoryStore::new();
        let j = job(1);
        store.create_job(j.clone()).await.unwrap();
        let device_id = Uuid::new_v4();
        store
            .record_result(result(j.id, device_id, ResultState::Success))
            .await
            .unwrap();
        let err = store
            .record_result(result(j.id, device_id, ResultState::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateResult { .. }));
    }

    #[tokio::test]
    async fn counters_are_monotonic_and_independent() {
        let store = MemoryStore::new();
        let j = job(3);
        store.create_job(j.clone()).await.unwrap();
        store.bump_completed(j.id).await.unwrap();
        store.bump_failed(j.id).await.unwrap();
        let updated = store.bump_completed(j.id).await.unwrap();
        assert_eq!((updated.completed, updated.failed), (2, 1));
    }

    #[tokio::test]
    async fn finish_job_is_terminal_exactly_once() {
        let store = MemoryStore::new();
        let j = job(0);
        store.create_job(j.clone()).await.unwrap();
        let done = store
            .finish_job(j.id, JobState::Complete, Utc::now())
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        let err = store
            .finish_job(j.id, JobState::Failed, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::AlreadyTerminal(j.id));
    }

    #[tokio::test]
    async fn device_history_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        for _ in 0..7 {
            let j = job(1);
            store.create_job(j.clone()).await.unwrap();
            store
                .record_result(result(j.id, device_id, ResultState::Success))
                .await
                .unwrap();
        }
        let history = store.device_history(device_id, 5).await.unwrap();
        assert_eq!(history.len(), 5);
        for pair in history.windows(2) {
            assert!(pair[0].at >= pair[1].at);
        }
    }

    #[tokio::test]
    async fn latest_success_skips_failures() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let j1 = job(1);
        let j2 = job(1);
        store.create_job(j1.clone()).await.unwrap();
        store.create_job(j2.clone()).await.unwrap();
        let mut ok = result(j1.id, device_id, ResultState::Success);
        ok.content_hash = "abc".into();
        store.record_result(ok).await.unwrap();
        store
            .record_result(result(j2.id, device_id, ResultState::Failed))
            .await
            .unwrap();

        let latest = store.latest_success(device_id).await.unwrap().unwrap();
        assert_eq!(latest.content_hash, "abc");
        assert_eq!(latest.job_id, j1.id);
    }

    #[tokio::test]
    async fn running_jobs_counts_only_running() {
        let store = MemoryStore::new();
        let j1 = job(0);
        let j2 = job(0);
        store.create_job(j1.clone()).await.unwrap();
        store.create_job(j2.clone()).await.unwrap();
        store
            .finish_job(j1.id, JobState::Complete, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.running_jobs().await.unwrap(), 1);
    }
}
