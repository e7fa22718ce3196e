// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded worker pools that fetch raw configurations from devices.
//!
//! Two pools share one external contract: feed them [`BackupTarget`]s and
//! they stream a [`DeviceOutcome`] per target. The CLI pool drives SSH
//! terminal sessions; the API pool drives vendor HTTPS exports. Both are
//! semaphore-bounded with FIFO intake, capture every failure as a
//! [`cv_core::DeviceError`] (never a propagated error), and honour one
//! cancellation token: queued targets are emitted as skipped, in-flight
//! sessions are aborted.

#![deny(unsafe_code)]

mod cli;
mod http;
mod pool;

pub use cli::CliPool;
pub use http::{ApiPool, ApiPoolBuildError};
pub use pool::BackupTarget;

use cv_core::DeviceError;

/// Classify a reqwest failure into the device-error taxonomy.
pub(crate) fn classify_http(err: &reqwest::Error) -> DeviceError {
    if err.is_timeout() {
        DeviceError::timeout(err.to_string())
    } else if err.is_connect() {
        DeviceError::unreachable(err.to_string())
    } else {
        DeviceError::transport(err.to_string())
    }
}

/// Classify an SSH session failure into the device-error taxonomy.
///
/// `async-ssh2-tokio` surfaces one error type for the whole session; the
/// taxonomy split is by failure shape.
pub(crate) fn classify_ssh(err: &async_ssh2_tokio::Error) -> DeviceError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("auth") || lower.contains("password") || lower.contains("key exchange") {
        DeviceError::auth(message)
    } else if lower.contains("connect")
        || lower.contains("resolve")
        || lower.contains("refused")
        || lower.contains("unreachable")
        || lower.contains("lookup")
        || lower.contains("invalid address")
    {
        DeviceError::unreachable(message)
    } else {
        DeviceError::transport(message)
    }
}
