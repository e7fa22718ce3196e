// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flat per-device error taxonomy.
//!
//! Every failure a device can experience during a backup collapses into a
//! [`DeviceError`] carrying a stable machine-readable [`ErrorKind`] tag and a
//! human-readable message. Errors are values recorded on results — they never
//! abort a job.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, machine-readable failure kind.
///
/// Each variant serialises to a snake_case string that does not change
/// across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The credential resolver returned nothing for the device.
    NoCredentials,
    /// Unsealing the device's stored password failed.
    CredentialDecrypt,
    /// The device refused the supplied credentials.
    AuthRejected,
    /// TCP connect or DNS resolution failed.
    Unreachable,
    /// The per-device deadline expired (or the session was cancelled).
    Timeout,
    /// Mid-session I/O error.
    Transport,
    /// The response did not match the expected shape.
    Protocol,
    /// Normalization failed; the original text was committed instead.
    Scrub,
    /// The repository service call failed after retries.
    RepositoryUnavailable,
    /// Orchestrator-level failure (inventory load, store unavailable).
    Fatal,
}

impl ErrorKind {
    /// Stable string tag (matches the serde representation).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredentials => "no_credentials",
            Self::CredentialDecrypt => "credential_decrypt",
            Self::AuthRejected => "auth_rejected",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Scrub => "scrub",
            Self::RepositoryUnavailable => "repository_unavailable",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-device failure: taxonomy kind plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    /// Machine-readable failure kind.
    pub kind: ErrorKind,
    /// Human-readable description. Never contains credential material.
    pub message: String,
}

impl DeviceError {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The device refused the supplied credentials.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRejected, message)
    }

    /// TCP connect or DNS resolution failed.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unreachable, message)
    }

    /// The per-device deadline expired.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Mid-session I/O error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// The response did not match the expected shape.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for DeviceError {}
