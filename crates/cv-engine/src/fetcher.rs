// SPDX-License-Identifier: MIT OR Apache-2.0
//! Seam between the orchestrator and the transport pools.
//!
//! Production wires [`PoolFetcher`] (real SSH and HTTPS pools); tests swap
//! in scripted fetchers to drive whole-job scenarios without sockets.

use cv_core::{CancellationToken, DeviceOutcome};
use cv_transport::{ApiPool, BackupTarget, CliPool};
use tokio::sync::mpsc;

/// Streams raw configurations for partitioned target sets.
pub trait ConfigFetcher: Send + Sync {
    /// Run the terminal (SSH) pool over `targets`.
    fn run_cli(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome>;

    /// Run the HTTP (API) pool over `targets`.
    fn run_api(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome>;
}

/// The production fetcher: both bounded pools.
pub struct PoolFetcher {
    cli: CliPool,
    api: ApiPool,
}

impl PoolFetcher {
    /// Wire both pools from their budgets and timeouts.
    #[must_use]
    pub fn new(cli: CliPool, api: ApiPool) -> Self {
        Self { cli, api }
    }
}

impl ConfigFetcher for PoolFetcher {
    fn run_cli(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome> {
        self.cli.run(targets, cancel)
    }

    fn run_api(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome> {
        self.api.run(targets, cancel)
    }
}
