// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared pool runner: semaphore-bounded fan-out with FIFO intake,
//! cancellation, and per-device outcome capture.

use cv_core::{CancellationToken, Device, DeviceError, DeviceOutcome, OutcomePayload};
use cv_creds::Credentials;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tracing::debug;

/// One unit of pool work: a device plus its already-resolved credentials.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    /// The device to back up.
    pub device: Device,
    /// Plaintext credentials, scoped to this backup only.
    pub credentials: Credentials,
}

/// Per-target fetch function supplied by the concrete pool.
pub(crate) type FetchFn =
    Arc<dyn Fn(BackupTarget) -> BoxFuture<'static, Result<String, DeviceError>> + Send + Sync>;

/// Dispatch `targets` through a semaphore of `workers` permits, streaming
/// one [`DeviceOutcome`] per target into the returned receiver.
///
/// Intake is FIFO over the target list; at most `workers` fetches are
/// in flight. A worker failure only consumes its own permit, so pool
/// capacity is invariant. Once `cancel` fires, targets still waiting for
/// a permit are emitted as skipped and in-flight fetches are abandoned
/// with a timeout-kind error.
pub(crate) fn run_pool(
    label: &'static str,
    workers: usize,
    targets: Vec<BackupTarget>,
    cancel: CancellationToken,
    fetch: FetchFn,
) -> mpsc::Receiver<DeviceOutcome> {
    let (tx, rx) = mpsc::channel(64.max(workers));
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    tokio::spawn(async move {
        for target in targets {
            let device_id = target.device.id;
            let hostname = target.device.hostname.clone();

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    Some(permit.expect("pool semaphore is never closed"))
                }
            };
            let Some(permit) = permit else {
                debug!(pool = label, device = %hostname, "skipped by cancellation");
                if tx.send(DeviceOutcome::skipped(device_id, hostname)).await.is_err() {
                    return;
                }
                continue;
            };

            let tx = tx.clone();
            let cancel = cancel.clone();
            let fetch = Arc::clone(&fetch);
            tokio::spawn(async move {
                let started = Instant::now();
                let payload = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => OutcomePayload::Failed(
                        DeviceError::timeout("session cancelled mid-flight"),
                    ),
                    result = fetch(target) => match result {
                        Ok(config) => OutcomePayload::Config(config),
                        Err(err) => OutcomePayload::Failed(err),
                    },
                };
                drop(permit);
                let _ = tx
                    .send(DeviceOutcome {
                        device_id,
                        hostname,
                        payload,
                        duration_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
            });
        }
    });

    rx
}
