// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client for the repository service (an internal git forge).
//!
//! One repository per site, one file per device. [`ForgeClient`] ensures
//! the org/repo pair exists, commits or overwrites a device's configuration
//! file with a revision precondition, and retrieves the unified diff
//! between the two most recent revisions of a file.
//!
//! Every transport failure or unexpected status collapses into the single
//! [`ForgeError::Unavailable`] kind; the orchestrator turns it into a
//! per-device failure and the job continues.

#![deny(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Attempts for a conditional create-or-update before giving up.
const COMMIT_ATTEMPTS: u32 = 3;

/// Initial retry delay; doubles per attempt.
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Overall per-request timeout against the forge.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the repository service.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// The forge was unreachable, rejected the request, or kept conflicting
    /// past the retry budget.
    #[error("repository service unavailable ({status:?}): {detail}")]
    Unavailable {
        /// HTTP status, when a response was received at all.
        status: Option<u16>,
        /// Body snippet or transport error text.
        detail: String,
    },
}

impl ForgeError {
    fn transport(err: &reqwest::Error) -> Self {
        Self::Unavailable {
            status: err.status().map(|s| s.as_u16()),
            detail: err.to_string(),
        }
    }

    async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let mut detail: String = body.chars().take(200).collect();
        if detail.is_empty() {
            detail = "empty body".into();
        }
        Self::Unavailable {
            status: Some(status),
            detail,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitEnvelope {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

/// Client for one forge instance, holding the shared connection pool and
/// the long-lived bearer token. Construct once at boot and share.
#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: reqwest::Client,
    base: String,
    token: String,
    org: String,
}

impl ForgeClient {
    /// Create a client for the forge at `base_url`, committing under `org`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
    ) -> Result<Self, ForgeError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ForgeError::Unavailable {
                status: None,
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            base: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
        })
    }

    /// The organization this client commits under.
    #[must_use]
    pub fn org(&self) -> &str {
        &self.org
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
    }

    /// Ensure the org and `repo` exist, creating either as needed with an
    /// initial commit. "Already exists" responses count as success, so
    /// concurrent callers with identical arguments converge.
    pub async fn ensure_repo(&self, repo: &str) -> Result<(), ForgeError> {
        let resp = self
            .auth(self.http.post(self.url("/orgs")))
            .json(&json!({ "username": self.org }))
            .send()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        if !resp.status().is_success() && !already_exists(resp.status()) {
            return Err(ForgeError::from_response(resp).await);
        }

        let resp = self
            .auth(self.http.post(self.url(&format!("/orgs/{}/repos", self.org))))
            .json(&json!({ "name": repo, "auto_init": true }))
            .send()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        if resp.status().is_success() || already_exists(resp.status()) {
            debug!(org = %self.org, repo, "repository ensured");
            Ok(())
        } else {
            Err(ForgeError::from_response(resp).await)
        }
    }

    /// Revision identifier of `path` in `repo`, or `None` when the file
    /// does not exist yet.
    async fn file_sha(&self, repo: &str, path: &str) -> Result<Option<String>, ForgeError> {
        let url = self.url(&format!("/repos/{}/{repo}/contents/{path}", self.org));
        let resp = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        match resp.status() {
            s if s.is_success() => {
                let contents: ContentsResponse = resp
                    .json()
                    .await
                    .map_err(|e| ForgeError::transport(&e))?;
                Ok(Some(contents.sha))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            _ => Err(ForgeError::from_response(resp).await),
        }
    }

    /// Create or overwrite `path` in `repo` with `content`, returning the
    /// resulting commit identifier.
    ///
    /// The current file revision is read first and submitted as the update
    /// precondition. A conflicting concurrent update (409) re-reads the
    /// revision and retries with exponential backoff, up to
    /// [`COMMIT_ATTEMPTS`] attempts.
    pub async fn commit_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, ForgeError> {
        let encoded = B64.encode(content.as_bytes());
        let url = self.url(&format!("/repos/{}/{repo}/contents/{path}", self.org));

        let mut last_detail = String::new();
        for attempt in 0..COMMIT_ATTEMPTS {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let sha = self.file_sha(repo, path).await?;
            let mut body = json!({ "message": message, "content": encoded });
            if let Some(ref sha) = sha {
                body["sha"] = json!(sha);
            }

            let resp = self
                .auth(self.http.put(&url))
                .json(&body)
                .send()
                .await
                .map_err(|e| ForgeError::transport(&e))?;

            if resp.status() == reqwest::StatusCode::CONFLICT {
                debug!(repo, path, attempt, "commit precondition conflict, retrying");
                last_detail = "update precondition conflict".into();
                continue;
            }
            if !resp.status().is_success() {
                return Err(ForgeError::from_response(resp).await);
            }
            let envelope: CommitEnvelope = resp
                .json()
                .await
                .map_err(|e| ForgeError::transport(&e))?;
            return Ok(envelope.commit.sha);
        }

        Err(ForgeError::Unavailable {
            status: Some(409),
            detail: format!("{last_detail} after {COMMIT_ATTEMPTS} attempts"),
        })
    }

    /// Unified diff between the two most recent revisions touching `path`.
    /// Returns empty text when fewer than two revisions exist.
    pub async fn diff(&self, repo: &str, path: &str) -> Result<String, ForgeError> {
        let url = self.url(&format!("/repos/{}/{repo}/commits", self.org));
        let resp = self
            .auth(self.http.get(url))
            .query(&[("path", path), ("limit", "2")])
            .send()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        if !resp.status().is_success() {
            return Err(ForgeError::from_response(resp).await);
        }
        let commits: Vec<CommitRef> = resp
            .json()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        let [newest, previous, ..] = commits.as_slice() else {
            return Ok(String::new());
        };

        let url = self.url(&format!(
            "/repos/{}/{repo}/compare/{}...{}.diff",
            self.org, previous.sha, newest.sha
        ));
        let resp = self
            .auth(self.http.get(url))
            .send()
            .await
            .map_err(|e| ForgeError::transport(&e))?;
        if !resp.status().is_success() {
            return Err(ForgeError::from_response(resp).await);
        }
        resp.text().await.map_err(|e| ForgeError::transport(&e))
    }
}

fn already_exists(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 409 | 422)
}
