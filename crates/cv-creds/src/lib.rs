// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential sealing and resolution.
//!
//! Passwords at rest are sealed in an AES-256-GCM envelope under a single
//! boot-supplied key. The [`CredentialResolver`] turns a device plus its
//! optional credential set into plaintext credentials, falling back to the
//! process-wide pair when the device has none. Unsealing failures are
//! terminal — they never trigger the fallback.
//!
//! Plaintext lives only inside the scope of a single device's backup;
//! [`Credentials`] redacts its password in `Debug` output.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use cv_core::{CredentialSet, Device};
use std::fmt;

/// Length of the AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the GCM nonce prefixed to every sealed payload.
const NONCE_LEN: usize = 12;

/// Errors from the envelope and the resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredError {
    /// The boot key is not 32 bytes of valid base64.
    #[error("unseal key must be {KEY_LEN} bytes of base64: {0}")]
    BadKey(String),
    /// The sealed payload is corrupt or was sealed under a different key.
    #[error("failed to unseal credential: {0}")]
    Decrypt(String),
    /// Neither a device credential set nor fallback credentials exist.
    #[error("no credentials available for device")]
    None,
}

/// A resolved username/password pair.
///
/// `Debug` redacts the password so accidental logging of the struct can
/// never leak it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login username.
    pub username: String,
    /// Plaintext password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The process-wide symmetric envelope key.
#[derive(Clone)]
pub struct UnsealKey {
    key: Key<Aes256Gcm>,
}

impl UnsealKey {
    /// Decode a base64-encoded 32-byte key as supplied at boot.
    pub fn from_base64(encoded: &str) -> Result<Self, CredError> {
        let bytes = B64
            .decode(encoded.trim())
            .map_err(|e| CredError::BadKey(e.to_string()))?;
        if bytes.len() != KEY_LEN {
            return Err(CredError::BadKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    /// Seal `plaintext`, producing base64(nonce ‖ ciphertext).
    ///
    /// A fresh random nonce is drawn per call, so sealing is not
    /// deterministic; unsealing is.
    pub fn seal(&self, plaintext: &str) -> Result<String, CredError> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CredError::Decrypt(e.to_string()))?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(B64.encode(payload))
    }

    /// Unseal a payload produced by [`seal`](Self::seal).
    pub fn unseal(&self, sealed: &str) -> Result<String, CredError> {
        let payload = B64
            .decode(sealed.trim())
            .map_err(|e| CredError::Decrypt(format!("bad base64: {e}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(CredError::Decrypt("payload too short".into()));
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredError::Decrypt("authentication failed".into()))?;
        String::from_utf8(plaintext).map_err(|e| CredError::Decrypt(e.to_string()))
    }
}

impl fmt::Debug for UnsealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnsealKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves `(device, credential set) -> credentials`.
///
/// Resolution order, first match wins:
/// 1. the device's credential set, unsealed under the boot key;
/// 2. the process-wide fallback pair, when configured non-empty;
/// 3. [`CredError::None`].
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    key: UnsealKey,
    fallback: Option<Credentials>,
}

impl CredentialResolver {
    /// Create a resolver from the boot key and optional fallback pair.
    ///
    /// An empty fallback username is treated as "no fallback configured".
    #[must_use]
    pub fn new(key: UnsealKey, fallback: Option<Credentials>) -> Self {
        let fallback = fallback.filter(|c| !c.username.is_empty());
        Self { key, fallback }
    }

    /// Resolve credentials for `device`.
    ///
    /// An unseal failure on the device's own credential set is returned
    /// as-is — it does not fall through to the fallback pair.
    pub fn resolve(
        &self,
        device: &Device,
        credential_set: Option<&CredentialSet>,
    ) -> Result<Credentials, CredError> {
        debug_assert_eq!(
            device.credential_set_id.is_some(),
            credential_set.is_some(),
            "inventory must join the credential set it references"
        );
        if let Some(set) = credential_set {
            let password = self.key.unseal(&set.sealed_password)?;
            return Ok(Credentials {
                username: set.username.clone(),
                password,
            });
        }
        self.fallback.clone().ok_or(CredError::None)
    }

    /// Access the envelope key (used by CRUD surfaces to seal new secrets).
    #[must_use]
    pub fn key(&self) -> &UnsealKey {
        &self.key
    }
}
