// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inventory records: sites, credential sets, devices.

use crate::Platform;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical location owning one configuration repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Unique identifier.
    pub id: Uuid,
    /// Short unique site code (e.g. `"nyc"`). Immutable once a backup
    /// references it.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Repository name on the forge (e.g. `"nyc-configs"`). Immutable once
    /// a backup references it.
    pub repo_name: String,
}

/// A named username/password pair; the password is stored sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Unique identifier.
    pub id: Uuid,
    /// Unique human-readable label.
    pub label: String,
    /// Login username.
    pub username: String,
    /// Envelope-sealed password (base64 of nonce ‖ ciphertext).
    pub sealed_password: String,
}

/// A network device eligible for backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier.
    pub id: Uuid,
    /// Hostname; unique within a site. Used as the committed file name.
    pub hostname: String,
    /// Management address (IP or resolvable name).
    pub address: String,
    /// Platform; immutable for the life of the device.
    pub platform: Platform,
    /// Owning site.
    pub site_id: Uuid,
    /// Device-specific credential set, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_set_id: Option<Uuid>,
    /// Per-device TLS verification override for API platforms. `None`
    /// falls back to the boot-level `api_tls_verify` setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    /// Disabled devices are excluded from job selection.
    pub enabled: bool,
}

impl Device {
    /// Name of the file this device's configuration is committed under.
    #[must_use]
    pub fn config_file_name(&self) -> String {
        format!("{}.txt", self.hostname)
    }
}

/// A device joined with its site and optional credential set, as loaded
/// from the inventory for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// The device record.
    pub device: Device,
    /// The owning site.
    pub site: Site,
    /// The device-specific credential set, when one is assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_set: Option<CredentialSet>,
}
