// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP worker pool: vendor-specific HTTPS configuration exports.
//!
//! Each device runs a two-step flow — authenticate, then export. TLS
//! verification is explicit configuration: the boot-level default applies
//! unless the device carries its own override. Appliances in the target
//! environment commonly present self-signed certificates, so the shipped
//! default is off.

use crate::classify_http;
use crate::pool::{BackupTarget, FetchFn, run_pool};
use cv_core::{CancellationToken, Device, DeviceError, DeviceOutcome, Platform};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

static PANOS_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<key>([^<]+)</key>").expect("constant pattern is valid"));

/// Errors building the pool's HTTP clients.
#[derive(Debug, thiserror::Error)]
#[error("failed to build HTTP client: {0}")]
pub struct ApiPoolBuildError(String);

/// Bounded executor for HTTPS-API platforms.
#[derive(Debug, Clone)]
pub struct ApiPool {
    workers: usize,
    timeout: Duration,
    verify_default: bool,
    verified: reqwest::Client,
    insecure: reqwest::Client,
}

impl ApiPool {
    /// Create a pool with `workers` concurrent exports, a per-device
    /// end-to-end `timeout`, and the boot-level TLS verification default.
    pub fn new(
        workers: usize,
        timeout: Duration,
        verify_default: bool,
    ) -> Result<Self, ApiPoolBuildError> {
        let builder = || {
            reqwest::Client::builder()
                .pool_max_idle_per_host(workers.max(1))
                .connect_timeout(timeout)
        };
        let verified = builder()
            .build()
            .map_err(|e| ApiPoolBuildError(e.to_string()))?;
        let insecure = builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ApiPoolBuildError(e.to_string()))?;
        Ok(Self {
            workers,
            timeout,
            verify_default,
            verified,
            insecure,
        })
    }

    /// The client matching the device's effective TLS-verify setting.
    fn client_for(&self, device: &Device) -> reqwest::Client {
        if device.tls_verify.unwrap_or(self.verify_default) {
            self.verified.clone()
        } else {
            self.insecure.clone()
        }
    }

    /// Stream one outcome per target. Same contract as the CLI pool.
    pub fn run(
        &self,
        targets: Vec<BackupTarget>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<DeviceOutcome> {
        let pool = self.clone();
        let fetch: FetchFn = Arc::new(move |target| {
            let client = pool.client_for(&target.device);
            let timeout = pool.timeout;
            Box::pin(async move {
                tokio::time::timeout(timeout, export_config(&client, &target))
                    .await
                    .map_err(|_| {
                        DeviceError::timeout(format!("exceeded {} s deadline", timeout.as_secs()))
                    })?
            })
        });
        run_pool("api", self.workers, targets, cancel, fetch)
    }
}

/// Management addresses may carry an explicit scheme; bare addresses
/// default to HTTPS.
fn base_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("https://{address}")
    }
}

async fn export_config(client: &reqwest::Client, target: &BackupTarget) -> Result<String, DeviceError> {
    match target.device.platform {
        Platform::Panos => panos_export(client, target).await,
        Platform::Fortios => fortios_export(client, target).await,
        _ => Err(DeviceError::protocol("platform has no API transport")),
    }
}

// ---------------------------------------------------------------------------
// PAN-OS: keygen, then export
// ---------------------------------------------------------------------------

async fn panos_export(client: &reqwest::Client, target: &BackupTarget) -> Result<String, DeviceError> {
    let base = base_url(&target.device.address);

    let resp = client
        .get(format!("{base}/api/"))
        .query(&[
            ("type", "keygen"),
            ("user", target.credentials.username.as_str()),
            ("password", target.credentials.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| classify_http(&e))?;
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(DeviceError::auth(format!("keygen rejected with {status}")));
    }
    if !status.is_success() {
        return Err(DeviceError::protocol(format!("keygen returned {status}")));
    }
    let body = resp.text().await.map_err(|e| classify_http(&e))?;
    let key = PANOS_KEY
        .captures(&body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DeviceError::auth("keygen response carried no <key>"))?;

    let resp = client
        .get(format!("{base}/api/"))
        .query(&[
            ("type", "export"),
            ("category", "configuration"),
            ("key", key.as_str()),
        ])
        .send()
        .await
        .map_err(|e| classify_http(&e))?;
    if !resp.status().is_success() {
        return Err(DeviceError::protocol(format!(
            "config export returned {}",
            resp.status()
        )));
    }
    debug!(device = %target.device.hostname, "panos export complete");
    resp.text().await.map_err(|e| classify_http(&e))
}

// ---------------------------------------------------------------------------
// FortiOS: login, then backup
// ---------------------------------------------------------------------------

async fn fortios_export(client: &reqwest::Client, target: &BackupTarget) -> Result<String, DeviceError> {
    let base = base_url(&target.device.address);

    let resp = client
        .post(format!("{base}/api/v2/auth/login"))
        .json(&json!({
            "username": target.credentials.username,
            "password": target.credentials.password,
        }))
        .send()
        .await
        .map_err(|e| classify_http(&e))?;
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(DeviceError::auth(format!("login rejected with {status}")));
    }
    if !status.is_success() {
        return Err(DeviceError::protocol(format!("login returned {status}")));
    }
    let token = match token_cookie(&resp) {
        Some(cookie) => cookie,
        None => token_from_body(&resp.text().await.map_err(|e| classify_http(&e))?)?,
    };

    let resp = client
        .get(format!("{base}/api/v2/monitor/system/config/backup"))
        .query(&[("scope", "global")])
        .bearer_auth(&token)
        .send()
        .await
        .map_err(|e| classify_http(&e))?;
    if !resp.status().is_success() {
        return Err(DeviceError::protocol(format!(
            "config backup returned {}",
            resp.status()
        )));
    }
    debug!(device = %target.device.hostname, "fortios export complete");
    resp.text().await.map_err(|e| classify_http(&e))
}

/// The login endpoint hands back the bearer token either as a session
/// cookie or as a `token` field in the JSON body.
fn token_from_body(body: &str) -> Result<String, DeviceError> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("token").and_then(|t| t.as_str()).map(str::to_string))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DeviceError::auth("login response carried no token"))
}

fn token_cookie(resp: &reqwest::Response) -> Option<String> {
    for value in resp.headers().get_all(reqwest::header::SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        let Some((name, rest)) = text.split_once('=') else {
            continue;
        };
        if name.trim().to_ascii_lowercase().contains("token") {
            let value = rest.split(';').next().unwrap_or("").trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
