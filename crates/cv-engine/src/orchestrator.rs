// SPDX-License-Identifier: MIT OR Apache-2.0
//! The backup orchestrator: drives one job from start to terminal state.
//!
//! Both transport pools stream their outcomes into a single consumer loop
//! that performs every store mutation and progress publication, which keeps
//! the job counters correct under concurrent producers without row-level
//! atomic arithmetic.

use crate::bus::ProgressBus;
use crate::fetcher::ConfigFetcher;
use chrono::Utc;
use cv_core::{
    BackupResult, CancellationToken, DeviceContext, DeviceError, DeviceOutcome, ErrorKind, Job,
    JobState, OutcomePayload, ProgressEvent, ResultState, Transport,
};
use cv_creds::{CredError, CredentialResolver};
use cv_forge::{ForgeClient, ForgeError};
use cv_store::{BackupStore, Inventory, StoreError};
use cv_transport::BackupTarget;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Engine-level failures surfaced to callers (the REST layer maps these to
/// status codes). Per-device failures never appear here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The site/device selectors matched no enabled device.
    #[error("no devices matched the selection")]
    EmptySelection,
    /// The configured concurrent-job limit is already reached.
    #[error("concurrent job limit reached")]
    JobLimitReached,
    /// The referenced job does not exist.
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    /// The persistence layer failed; for a running job this is the
    /// catastrophic path that marks it `failed`.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Concurrency budgets and timeouts, from boot configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Terminal pool budget.
    pub cli_workers: usize,
    /// HTTP pool budget.
    pub api_workers: usize,
    /// Per-device wall clock for SSH connect + read.
    pub cli_timeout: Duration,
    /// Per-device end-to-end HTTP deadline.
    pub api_timeout: Duration,
    /// Boot-level TLS verification default for API devices.
    pub api_tls_verify: bool,
    /// Jobs allowed in state `running` at once.
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cli_workers: 50,
            api_workers: 30,
            cli_timeout: Duration::from_secs(120),
            api_timeout: Duration::from_secs(60),
            api_tls_verify: false,
            max_concurrent_jobs: 1,
        }
    }
}

/// Drives backup jobs. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Orchestrator {
    inventory: Arc<dyn Inventory>,
    store: Arc<dyn BackupStore>,
    forge: ForgeClient,
    resolver: CredentialResolver,
    fetcher: Arc<dyn ConfigFetcher>,
    bus: ProgressBus,
    config: EngineConfig,
    cancels: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        inventory: Arc<dyn Inventory>,
        store: Arc<dyn BackupStore>,
        forge: ForgeClient,
        resolver: CredentialResolver,
        fetcher: Arc<dyn ConfigFetcher>,
        bus: ProgressBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            inventory,
            store,
            forge,
            resolver,
            fetcher,
            bus,
            config,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The progress bus (the WebSocket layer subscribes through this).
    #[must_use]
    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    /// Select devices, create the job row, and launch execution in the
    /// background. Returns the freshly created job.
    pub async fn start_job(
        &self,
        triggered_by: &str,
        site_id: Option<Uuid>,
        device_ids: Vec<Uuid>,
    ) -> Result<Job, EngineError> {
        if self.store.running_jobs().await? >= self.config.max_concurrent_jobs {
            return Err(EngineError::JobLimitReached);
        }
        let selected = self
            .inventory
            .devices_for_selection(site_id, &device_ids)
            .await?;
        if selected.is_empty() {
            return Err(EngineError::EmptySelection);
        }

        let job = Job {
            id: Uuid::new_v4(),
            triggered_at: Utc::now(),
            triggered_by: triggered_by.to_string(),
            state: JobState::Running,
            total: selected.len() as u32,
            completed: 0,
            failed: 0,
            started_at: None,
            completed_at: None,
        };
        self.store.create_job(job.clone()).await?;

        let ids: Vec<Uuid> = selected.iter().map(|c| c.device.id).collect();
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .expect("cancel registry lock poisoned")
            .insert(job.id, cancel.clone());

        let this = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            if let Err(err) = this.run_job(job_id, ids, cancel).await {
                error!(%job_id, error = %err, "backup job aborted");
            }
            this.cancels
                .lock()
                .expect("cancel registry lock poisoned")
                .remove(&job_id);
        });

        info!(%job_id, total = job.total, "backup job started");
        Ok(job)
    }

    /// Cancel a running job. Returns `false` when the job is unknown or
    /// already terminal.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let cancels = self.cancels.lock().expect("cancel registry lock poisoned");
        match cancels.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute one job to its terminal state.
    ///
    /// Every selected device ends with exactly one result row; per-device
    /// failures never abort the job. Catastrophic failures (inventory or
    /// store unavailable) mark the job `failed` and return the error.
    pub async fn run_job(
        &self,
        job_id: Uuid,
        device_ids: Vec<Uuid>,
        cancel: CancellationToken,
    ) -> Result<Job, EngineError> {
        let job = self
            .store
            .job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        self.bus.publish(ProgressEvent::initial(job_id, job.total));

        // Load every device with its joins up front; a store failure here
        // is catastrophic.
        let mut contexts: HashMap<Uuid, DeviceContext> = HashMap::new();
        let mut missing: Vec<Uuid> = Vec::new();
        for id in &device_ids {
            match self.inventory.device_context(*id).await {
                Ok(Some(ctx)) => {
                    contexts.insert(*id, ctx);
                }
                Ok(None) => missing.push(*id),
                Err(err) => return self.abort_job(job_id, err).await,
            }
        }

        self.store.mark_started(job_id, Utc::now()).await?;

        // Devices that fail before any transport work: gone from the
        // inventory, or without usable credentials.
        for id in missing {
            self.record_failure(
                job_id,
                id,
                id.to_string(),
                DeviceError::new(ErrorKind::Fatal, "device missing from inventory"),
                0,
            )
            .await;
        }

        let mut cli_targets: Vec<BackupTarget> = Vec::new();
        let mut api_targets: Vec<BackupTarget> = Vec::new();
        for ctx in contexts.values() {
            match self
                .resolver
                .resolve(&ctx.device, ctx.credential_set.as_ref())
            {
                Ok(credentials) => {
                    let target = BackupTarget {
                        device: ctx.device.clone(),
                        credentials,
                    };
                    match ctx.device.platform.transport() {
                        Transport::Cli => cli_targets.push(target),
                        Transport::Api => api_targets.push(target),
                    }
                }
                Err(err) => {
                    let kind = match err {
                        CredError::None => ErrorKind::NoCredentials,
                        CredError::Decrypt(_) | CredError::BadKey(_) => ErrorKind::CredentialDecrypt,
                    };
                    self.record_failure(
                        job_id,
                        ctx.device.id,
                        ctx.device.hostname.clone(),
                        DeviceError::new(kind, err.to_string()),
                        0,
                    )
                    .await;
                }
            }
        }
        // Deterministic intake order keeps pool fairness observable.
        cli_targets.sort_by(|a, b| a.device.hostname.cmp(&b.device.hostname));
        api_targets.sort_by(|a, b| a.device.hostname.cmp(&b.device.hostname));

        let mut cli_rx = self.fetcher.run_cli(cli_targets, cancel.clone());
        let mut api_rx = self.fetcher.run_api(api_targets, cancel.clone());

        // The single-consumer funnel: all store writes and progress
        // publishes happen here, in arrival order.
        let mut ensured_repos: HashSet<Uuid> = HashSet::new();
        let (mut cli_done, mut api_done) = (false, false);
        while !(cli_done && api_done) {
            let outcome = tokio::select! {
                outcome = cli_rx.recv(), if !cli_done => {
                    if outcome.is_none() {
                        cli_done = true;
                    }
                    outcome
                }
                outcome = api_rx.recv(), if !api_done => {
                    if outcome.is_none() {
                        api_done = true;
                    }
                    outcome
                }
            };
            if let Some(outcome) = outcome {
                self.handle_outcome(job_id, &contexts, outcome, &mut ensured_repos)
                    .await;
            }
        }

        let job = self
            .store
            .finish_job(job_id, JobState::Complete, Utc::now())
            .await?;
        self.bus.publish(terminal_event(&job));
        info!(
            %job_id,
            completed = job.completed,
            failed = job.failed,
            skipped = job.skipped(),
            "backup job complete"
        );
        Ok(job)
    }

    /// Catastrophic path: mark the job failed and emit the terminal event.
    async fn abort_job(&self, job_id: Uuid, err: StoreError) -> Result<Job, EngineError> {
        error!(%job_id, error = %err, "inventory load failed, aborting job");
        let job = self
            .store
            .finish_job(job_id, JobState::Failed, Utc::now())
            .await?;
        self.bus.publish(terminal_event(&job));
        Err(EngineError::Store(err))
    }

    async fn handle_outcome(
        &self,
        job_id: Uuid,
        contexts: &HashMap<Uuid, DeviceContext>,
        outcome: DeviceOutcome,
        ensured_repos: &mut HashSet<Uuid>,
    ) {
        match outcome.payload {
            OutcomePayload::Skipped => {
                self.record_skip(job_id, outcome.device_id, outcome.hostname)
                    .await;
            }
            OutcomePayload::Failed(err) => {
                self.record_failure(
                    job_id,
                    outcome.device_id,
                    outcome.hostname,
                    err,
                    outcome.duration_ms,
                )
                .await;
            }
            OutcomePayload::Config(raw) => {
                let Some(ctx) = contexts.get(&outcome.device_id) else {
                    // The pools only run devices handed to them; this is a
                    // programmer error, recorded rather than panicked on.
                    self.record_failure(
                        job_id,
                        outcome.device_id,
                        outcome.hostname,
                        DeviceError::new(ErrorKind::Fatal, "outcome for unknown device"),
                        outcome.duration_ms,
                    )
                    .await;
                    return;
                };
                match self.commit_config(job_id, ctx, &raw, ensured_repos).await {
                    Ok((hash, commit_id)) => {
                        self.record_success(
                            job_id,
                            ctx,
                            hash,
                            commit_id,
                            outcome.duration_ms,
                        )
                        .await;
                    }
                    Err(err) => {
                        self.record_failure(
                            job_id,
                            outcome.device_id,
                            outcome.hostname,
                            err,
                            outcome.duration_ms,
                        )
                        .await;
                    }
                }
            }
        }
    }

    /// Scrub, ensure the site repository (memoized per job), and commit.
    async fn commit_config(
        &self,
        job_id: Uuid,
        ctx: &DeviceContext,
        raw: &str,
        ensured_repos: &mut HashSet<Uuid>,
    ) -> Result<(String, String), DeviceError> {
        let scrubbed = cv_scrub::scrub(raw, ctx.device.platform);

        // An unchanged hash still commits: the forge history is the
        // authoritative record of when the device was checked.
        if let Ok(Some(prior)) = self.store.latest_success(ctx.device.id).await {
            if prior.content_hash == scrubbed.hash {
                debug!(device = %ctx.device.hostname, "configuration unchanged since last backup");
            }
        }

        if !ensured_repos.contains(&ctx.site.id) {
            self.forge
                .ensure_repo(&ctx.site.repo_name)
                .await
                .map_err(forge_failure)?;
            ensured_repos.insert(ctx.site.id);
        }

        let message = format!("backup job {job_id}: {}", ctx.device.hostname);
        let commit_id = self
            .forge
            .commit_file(
                &ctx.site.repo_name,
                &ctx.device.config_file_name(),
                &scrubbed.text,
                &message,
            )
            .await
            .map_err(forge_failure)?;
        Ok((scrubbed.hash, commit_id))
    }

    async fn record_success(
        &self,
        job_id: Uuid,
        ctx: &DeviceContext,
        content_hash: String,
        commit_id: String,
        duration_ms: u64,
    ) {
        let result = BackupResult {
            id: Uuid::new_v4(),
            job_id,
            device_id: ctx.device.id,
            hostname: ctx.device.hostname.clone(),
            state: ResultState::Success,
            content_hash,
            commit_id: Some(commit_id),
            error: None,
            duration_ms,
            at: Utc::now(),
        };
        if let Err(err) = self.store.record_result(result).await {
            warn!(%job_id, device = %ctx.device.hostname, error = %err, "result not recorded");
            return;
        }
        match self.store.bump_completed(job_id).await {
            Ok(job) => self.bus.publish(progress_event(
                &job,
                ctx.device.hostname.clone(),
                ResultState::Success,
            )),
            Err(err) => error!(%job_id, error = %err, "completed counter not bumped"),
        }
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        device_id: Uuid,
        hostname: String,
        err: DeviceError,
        duration_ms: u64,
    ) {
        debug!(%job_id, device = %hostname, kind = %err.kind, "device backup failed");
        let result = BackupResult {
            id: Uuid::new_v4(),
            job_id,
            device_id,
            hostname: hostname.clone(),
            state: ResultState::Failed,
            content_hash: String::new(),
            commit_id: None,
            error: Some(err),
            duration_ms,
            at: Utc::now(),
        };
        if let Err(err) = self.store.record_result(result).await {
            warn!(%job_id, device = %hostname, error = %err, "result not recorded");
            return;
        }
        match self.store.bump_failed(job_id).await {
            Ok(job) => {
                self.bus
                    .publish(progress_event(&job, hostname, ResultState::Failed));
            }
            Err(err) => error!(%job_id, error = %err, "failed counter not bumped"),
        }
    }

    async fn record_skip(&self, job_id: Uuid, device_id: Uuid, hostname: String) {
        let result = BackupResult {
            id: Uuid::new_v4(),
            job_id,
            device_id,
            hostname: hostname.clone(),
            state: ResultState::Skipped,
            content_hash: String::new(),
            commit_id: None,
            error: None,
            duration_ms: 0,
            at: Utc::now(),
        };
        if let Err(err) = self.store.record_result(result).await {
            warn!(%job_id, device = %hostname, error = %err, "result not recorded");
            return;
        }
        // Skips move no counter; publish so observers still see activity.
        if let Ok(Some(job)) = self.store.job(job_id).await {
            self.bus
                .publish(progress_event(&job, hostname, ResultState::Skipped));
        }
    }
}

fn forge_failure(err: ForgeError) -> DeviceError {
    DeviceError::new(ErrorKind::RepositoryUnavailable, err.to_string())
}

fn progress_event(job: &Job, last_device: String, last_status: ResultState) -> ProgressEvent {
    ProgressEvent {
        job_id: job.id,
        total: job.total,
        completed: job.completed,
        failed: job.failed,
        state: job.state,
        last_device: Some(last_device),
        last_status: Some(last_status),
    }
}

fn terminal_event(job: &Job) -> ProgressEvent {
    ProgressEvent {
        job_id: job.id,
        total: job.total,
        completed: job.completed,
        failed: job.failed,
        state: job.state,
        last_device: None,
        last_status: None,
    }
}
