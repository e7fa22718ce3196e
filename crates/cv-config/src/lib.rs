// SPDX-License-Identifier: MIT OR Apache-2.0
//! Boot configuration for the confvault daemon.
//!
//! Settings load from an optional TOML file, then `CONFVAULT_*` environment
//! variables override individual fields. [`VaultConfig::validate`] returns
//! hard errors for unusable values and advisory [`ConfigWarning`]s for
//! things worth a second look.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Required length of the decoded unseal key.
const UNSEAL_KEY_LEN: usize = 32;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Errors & warnings
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },
    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },
    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// TLS verification for API devices is globally off.
    TlsVerificationDisabled,
    /// No fallback credentials; devices without a credential set will fail.
    NoFallbackCredentials,
    /// A worker budget is unusually large.
    LargeWorkerBudget {
        /// Which pool.
        pool: &'static str,
        /// Configured budget.
        workers: usize,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::TlsVerificationDisabled => {
                write!(f, "TLS verification for API devices is disabled")
            }
            ConfigWarning::NoFallbackCredentials => {
                write!(
                    f,
                    "no fallback credentials configured; devices without a credential set will fail"
                )
            }
            ConfigWarning::LargeWorkerBudget { pool, workers } => {
                write!(f, "{pool} pool budget of {workers} workers is unusually large")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config type
// ---------------------------------------------------------------------------

/// Process-wide boot settings.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// HTTP bind address for the REST façade.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Relational inventory database URL (consumed by the store
    /// collaborator; unused by the in-memory store).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Repository-service base URL.
    #[serde(default = "default_forge_url")]
    pub forge_url: String,

    /// Long-lived bearer token for the repository service.
    #[serde(default)]
    pub forge_token: String,

    /// Organization all site repositories live under.
    #[serde(default = "default_forge_org")]
    pub forge_org: String,

    /// Base64-encoded 32-byte credential unseal key.
    #[serde(default)]
    pub unseal_key: String,

    /// Process-wide fallback login username.
    #[serde(default)]
    pub fallback_username: Option<String>,

    /// Process-wide fallback login password.
    #[serde(default)]
    pub fallback_password: Option<String>,

    /// Terminal pool budget.
    #[serde(default = "default_cli_workers")]
    pub cli_workers: usize,

    /// HTTP pool budget.
    #[serde(default = "default_api_workers")]
    pub api_workers: usize,

    /// Per-device SSH wall-clock deadline, seconds.
    #[serde(default = "default_cli_timeout")]
    pub cli_timeout_secs: u64,

    /// Per-device API end-to-end deadline, seconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,

    /// TLS verification default for API devices. Explicitly off by
    /// default: the target fleet presents self-signed certificates.
    #[serde(default)]
    pub api_tls_verify: bool,

    /// Jobs allowed to run concurrently.
    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: usize,

    /// Progress-bus retention after a job's terminal event, seconds.
    #[serde(default = "default_bus_grace")]
    pub bus_grace_secs: u64,

    /// Log level override (e.g. `"debug"`).
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8070".into()
}
fn default_forge_url() -> String {
    "http://gitea.internal:3000".into()
}
fn default_forge_org() -> String {
    "netops".into()
}
fn default_cli_workers() -> usize {
    50
}
fn default_api_workers() -> usize {
    30
}
fn default_cli_timeout() -> u64 {
    120
}
fn default_api_timeout() -> u64 {
    60
}
fn default_max_jobs() -> usize {
    1
}
fn default_bus_grace() -> u64 {
    30
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_url: None,
            forge_url: default_forge_url(),
            forge_token: String::new(),
            forge_org: default_forge_org(),
            unseal_key: String::new(),
            fallback_username: None,
            fallback_password: None,
            cli_workers: default_cli_workers(),
            api_workers: default_api_workers(),
            cli_timeout_secs: default_cli_timeout(),
            api_timeout_secs: default_api_timeout(),
            api_tls_verify: false,
            max_concurrent_jobs: default_max_jobs(),
            bus_grace_secs: default_bus_grace(),
            log_level: None,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("bind", &self.bind)
            .field("forge_url", &self.forge_url)
            .field("forge_token", &"<redacted>")
            .field("forge_org", &self.forge_org)
            .field("unseal_key", &"<redacted>")
            .field("fallback_username", &self.fallback_username)
            .field("fallback_password", &self.fallback_password.as_ref().map(|_| "<redacted>"))
            .field("cli_workers", &self.cli_workers)
            .field("api_workers", &self.api_workers)
            .field("cli_timeout_secs", &self.cli_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("api_tls_verify", &self.api_tls_verify)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("bus_grace_secs", &self.bus_grace_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`VaultConfig`] from an optional TOML file path.
///
/// Environment variable overrides (`CONFVAULT_*`) are applied on top in
/// both cases.
pub fn load_config(path: Option<&Path>) -> Result<VaultConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => VaultConfig::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parse a TOML string into a [`VaultConfig`].
pub fn parse_toml(content: &str) -> Result<VaultConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply overrides from a key-lookup function (the environment in
/// production; a map in tests).
pub fn apply_overrides(config: &mut VaultConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CONFVAULT_BIND") {
        config.bind = v;
    }
    if let Some(v) = lookup("CONFVAULT_DATABASE_URL") {
        config.database_url = Some(v);
    }
    if let Some(v) = lookup("CONFVAULT_FORGE_URL") {
        config.forge_url = v;
    }
    if let Some(v) = lookup("CONFVAULT_FORGE_TOKEN") {
        config.forge_token = v;
    }
    if let Some(v) = lookup("CONFVAULT_FORGE_ORG") {
        config.forge_org = v;
    }
    if let Some(v) = lookup("CONFVAULT_UNSEAL_KEY") {
        config.unseal_key = v;
    }
    if let Some(v) = lookup("CONFVAULT_FALLBACK_USERNAME") {
        config.fallback_username = Some(v);
    }
    if let Some(v) = lookup("CONFVAULT_FALLBACK_PASSWORD") {
        config.fallback_password = Some(v);
    }
    if let Some(v) = lookup("CONFVAULT_CLI_WORKERS").and_then(|v| v.parse().ok()) {
        config.cli_workers = v;
    }
    if let Some(v) = lookup("CONFVAULT_API_WORKERS").and_then(|v| v.parse().ok()) {
        config.api_workers = v;
    }
    if let Some(v) = lookup("CONFVAULT_CLI_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.cli_timeout_secs = v;
    }
    if let Some(v) = lookup("CONFVAULT_API_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.api_timeout_secs = v;
    }
    if let Some(v) = lookup("CONFVAULT_API_TLS_VERIFY").and_then(|v| v.parse().ok()) {
        config.api_tls_verify = v;
    }
    if let Some(v) = lookup("CONFVAULT_MAX_CONCURRENT_JOBS").and_then(|v| v.parse().ok()) {
        config.max_concurrent_jobs = v;
    }
    if let Some(v) = lookup("CONFVAULT_BUS_GRACE_SECS").and_then(|v| v.parse().ok()) {
        config.bus_grace_secs = v;
    }
    if let Some(v) = lookup("CONFVAULT_LOG_LEVEL") {
        config.log_level = Some(v);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl VaultConfig {
    /// Validate the configuration, returning advisory warnings on success.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();

        match B64.decode(self.unseal_key.trim()) {
            Ok(bytes) if bytes.len() == UNSEAL_KEY_LEN => {}
            Ok(bytes) => reasons.push(format!(
                "unseal_key must decode to {UNSEAL_KEY_LEN} bytes, got {}",
                bytes.len()
            )),
            Err(_) => reasons.push("unseal_key is not valid base64".into()),
        }
        if self.forge_token.is_empty() {
            reasons.push("forge_token must not be empty".into());
        }
        if self.cli_workers == 0 {
            reasons.push("cli_workers must be at least 1".into());
        }
        if self.api_workers == 0 {
            reasons.push("api_workers must be at least 1".into());
        }
        if self.cli_timeout_secs == 0 || self.api_timeout_secs == 0 {
            reasons.push("per-device timeouts must be at least 1 second".into());
        }
        if self.max_concurrent_jobs == 0 {
            reasons.push("max_concurrent_jobs must be at least 1".into());
        }
        if let Some(level) = &self.log_level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                reasons.push(format!("unknown log_level '{level}'"));
            }
        }
        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        let mut warnings = Vec::new();
        if !self.api_tls_verify {
            warnings.push(ConfigWarning::TlsVerificationDisabled);
        }
        if self.fallback_username.is_none() {
            warnings.push(ConfigWarning::NoFallbackCredentials);
        }
        for (pool, workers) in [("cli", self.cli_workers), ("api", self.api_workers)] {
            if workers > 200 {
                warnings.push(ConfigWarning::LargeWorkerBudget { pool, workers });
            }
        }
        Ok(warnings)
    }
}
