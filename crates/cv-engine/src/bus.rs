// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job progress broadcast.
//!
//! Volatile state only: each running job owns one broadcast channel plus a
//! latest-snapshot cell, created on first publish or first subscribe and
//! garbage-collected a grace window after the terminal event. Publishing
//! never blocks the orchestrator — a lagging subscriber loses the oldest
//! undelivered events, not the producer.

use cv_core::ProgressEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast capacity per job; overflow drops the oldest events for the
/// lagging subscriber only.
const CHANNEL_CAPACITY: usize = 256;

/// Default retention after the terminal event, so reconnecting UIs can
/// still observe it.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

struct JobChannel {
    tx: broadcast::Sender<ProgressEvent>,
    latest: ProgressEvent,
}

/// Registry of per-job progress channels.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<Mutex<HashMap<Uuid, JobChannel>>>,
    grace: Duration,
}

impl ProgressBus {
    /// Create a bus with the default terminal grace window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    /// Create a bus with a custom grace window (tests use short ones).
    #[must_use]
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    /// Publish `event` to the job's subscribers and update the snapshot.
    ///
    /// Non-blocking. A terminal event schedules the channel for removal
    /// after the grace window.
    pub fn publish(&self, event: ProgressEvent) {
        let job_id = event.job_id;
        let terminal = event.state.is_terminal();
        {
            let mut inner = self.inner.lock().expect("bus registry lock poisoned");
            let channel = inner.entry(job_id).or_insert_with(|| {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                JobChannel {
                    tx,
                    latest: event.clone(),
                }
            });
            channel.latest = event.clone();
            // Send fails only when nobody is subscribed; that is fine.
            let _ = channel.tx.send(event);
        }
        if terminal {
            let registry = Arc::clone(&self.inner);
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                registry
                    .lock()
                    .expect("bus registry lock poisoned")
                    .remove(&job_id);
            });
        }
    }

    /// Subscribe to a job's progress.
    ///
    /// The returned stream yields the current snapshot first, then live
    /// events in publish order. `fallback` seeds the snapshot when no
    /// channel exists yet (or any more); a terminal fallback produces a
    /// stream that ends right after the snapshot.
    #[must_use]
    pub fn subscribe(&self, job_id: Uuid, fallback: ProgressEvent) -> ProgressStream {
        let mut inner = self.inner.lock().expect("bus registry lock poisoned");
        if let Some(channel) = inner.get(&job_id) {
            return ProgressStream {
                snapshot: Some(channel.latest.clone()),
                rx: channel.tx.subscribe(),
                done: false,
            };
        }
        if fallback.state.is_terminal() {
            // Closed channel: snapshot only.
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            return ProgressStream {
                snapshot: Some(fallback),
                rx,
                done: false,
            };
        }
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        inner.insert(
            job_id,
            JobChannel {
                tx,
                latest: fallback.clone(),
            },
        );
        ProgressStream {
            snapshot: Some(fallback),
            rx,
            done: false,
        }
    }

    /// Number of jobs with a live channel (snapshot retention included).
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.inner.lock().expect("bus registry lock poisoned").len()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's view of one job: snapshot first, then live events until
/// the terminal event (inclusive).
pub struct ProgressStream {
    snapshot: Option<ProgressEvent>,
    rx: broadcast::Receiver<ProgressEvent>,
    done: bool,
}

impl ProgressStream {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` once the terminal event has been delivered or the
    /// channel is gone. Lag skips ahead to the next retained event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        if let Some(snapshot) = self.snapshot.take() {
            if snapshot.state.is_terminal() {
                self.done = true;
            }
            return Some(snapshot);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.state.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
