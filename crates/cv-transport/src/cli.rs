// SPDX-License-Identifier: MIT OR Apache-2.0
//! Terminal worker pool: one SSH session, one show command, per device.

use crate::pool::{BackupTarget, FetchFn, run_pool};
use crate::classify_ssh;
use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use cv_core::{CancellationToken, DeviceError, DeviceOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Default terminal session port.
const DEFAULT_SSH_PORT: u16 = 22;

/// Bounded executor for SSH-based platforms.
#[derive(Debug, Clone)]
pub struct CliPool {
    workers: usize,
    timeout: Duration,
}

impl CliPool {
    /// Create a pool with `workers` concurrent sessions and a per-device
    /// wall-clock `timeout` spanning connect and read.
    #[must_use]
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self { workers, timeout }
    }

    /// Stream one outcome per target. See the pool contract in the crate
    /// docs for cancellation and capacity semantics.
    pub fn run(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome> {
        let timeout = self.timeout;
        let fetch: FetchFn = Arc::new(move |target| {
            Box::pin(async move { fetch_over_ssh(&target, timeout).await })
        });
        run_pool("cli", self.workers, targets, cancel, fetch)
    }
}

/// Split `host:port` management addresses; bare addresses use port 22.
fn ssh_endpoint(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (address.to_string(), DEFAULT_SSH_PORT),
        },
        None => (address.to_string(), DEFAULT_SSH_PORT),
    }
}

async fn fetch_over_ssh(target: &BackupTarget, timeout: Duration) -> Result<String, DeviceError> {
    let command = target
        .device
        .platform
        .show_command()
        .ok_or_else(|| DeviceError::protocol("platform has no terminal transport"))?;
    let (host, port) = ssh_endpoint(&target.device.address);

    let session = async {
        let client = Client::connect(
            (host.as_str(), port),
            &target.credentials.username,
            AuthMethod::with_password(&target.credentials.password),
            ServerCheckMethod::NoCheck,
        )
        .await
        .map_err(|e| classify_ssh(&e))?;

        let result = client.execute(command).await.map_err(|e| classify_ssh(&e))?;
        let _ = client.disconnect().await;

        if result.exit_status != 0 {
            return Err(DeviceError::protocol(format!(
                "show command exited with status {}",
                result.exit_status
            )));
        }
        debug!(device = %target.device.hostname, bytes = result.stdout.len(), "terminal fetch complete");
        Ok(result.stdout)
    };

    tokio::time::timeout(timeout, session)
        .await
        .map_err(|_| DeviceError::timeout(format!("exceeded {} s deadline", timeout.as_secs())))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::{ErrorKind, OutcomePayload, Platform};
    use cv_creds::Credentials;
    use uuid::Uuid;

    #[test]
    fn bare_address_uses_default_port() {
        assert_eq!(ssh_endpoint("core-1.nyc"), ("core-1.nyc".into(), 22));
    }

    #[test]
    fn explicit_port_is_honoured() {
        assert_eq!(ssh_endpoint("192.0.2.1:2222"), ("192.0.2.1".into(), 2222));
    }

    #[test]
    fn junk_port_falls_back_to_default() {
        assert_eq!(ssh_endpoint("host:abc"), ("host:abc".into(), 22));
    }

    #[tokio::test]
    async fn refused_connection_is_captured_not_propagated() {
        let pool = CliPool::new(2, Duration::from_secs(5));
        let target = BackupTarget {
            device: cv_core::Device {
                id: Uuid::new_v4(),
                hostname: "dead-1".into(),
                // Port 1 on localhost refuses immediately.
                address: "127.0.0.1:1".into(),
                platform: Platform::Ios,
                site_id: Uuid::nil(),
                credential_set_id: None,
                tls_verify: None,
                enabled: true,
            },
            credentials: Credentials {
                username: "netops".into(),
                password: "pw".into(),
            },
        };
        let mut rx = pool.run(vec![target], CancellationToken::new());
        let outcome = rx.recv().await.unwrap();
        match outcome.payload {
            OutcomePayload::Failed(err) => {
                assert!(
                    matches!(err.kind, ErrorKind::Unreachable | ErrorKind::Transport),
                    "unexpected kind {:?}",
                    err.kind
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
