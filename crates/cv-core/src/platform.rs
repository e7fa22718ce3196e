// SPDX-License-Identifier: MIT OR Apache-2.0
//! Device platform variants and their transport classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a platform's running configuration is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Interactive terminal session over SSH; one show command per backup.
    Cli,
    /// Vendor HTTPS API; auth step followed by a config export.
    Api,
}

/// Supported device platforms.
///
/// Adding a platform is a compile-checked change in three places: the
/// transport class here, the show command (CLI platforms), and the scrub
/// rule set in `cv-scrub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Cisco IOS / IOS-XE.
    Ios,
    /// Cisco NX-OS.
    Nxos,
    /// Arista EOS.
    Eos,
    /// Dell OS10.
    #[serde(rename = "dellos10")]
    DellOs10,
    /// Palo Alto PAN-OS.
    Panos,
    /// Fortinet FortiOS.
    Fortios,
}

impl Platform {
    /// Every supported platform, in declaration order.
    pub const ALL: [Platform; 6] = [
        Platform::Ios,
        Platform::Nxos,
        Platform::Eos,
        Platform::DellOs10,
        Platform::Panos,
        Platform::Fortios,
    ];

    /// Transport class used to retrieve this platform's configuration.
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self {
            Self::Ios | Self::Nxos | Self::Eos | Self::DellOs10 => Transport::Cli,
            Self::Panos | Self::Fortios => Transport::Api,
        }
    }

    /// The single show command issued over the terminal session.
    ///
    /// Returns `None` for API platforms, which export their configuration
    /// over HTTPS instead.
    #[must_use]
    pub fn show_command(&self) -> Option<&'static str> {
        match self {
            Self::Ios | Self::Nxos | Self::Eos => Some("show running-config"),
            Self::DellOs10 => Some("show running-configuration"),
            Self::Panos | Self::Fortios => None,
        }
    }

    /// Stable lowercase identifier (matches the serde representation).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Nxos => "nxos",
            Self::Eos => "eos",
            Self::DellOs10 => "dellos10",
            Self::Panos => "panos",
            Self::Fortios => "fortios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

/// Error returned when parsing an unrecognised platform identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(
    /// The identifier that failed to parse.
    pub String,
);
