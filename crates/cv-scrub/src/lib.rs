// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic configuration scrubbing.
//!
//! [`scrub`] normalizes a raw device configuration so that two runs against
//! an unchanged device produce byte-identical output, then computes a stable
//! SHA-256 content hash over the normalized text. Scrubbing is a pure
//! function: no I/O, no clock, no randomness.
//!
//! Rules are ordered — platform-specific substitutions run first, then the
//! common pass shared by every platform. Each substitution replaces the
//! removed value with a fixed sentinel (`<uptime>`, `<timestamp>`,
//! `<serial>`, `<ip-address>`, `<uuid>`, `<version>`, `<build>`) so the
//! surrounding structure survives.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cv_core::{Platform, sha256_hex};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Normalized configuration text plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scrubbed {
    /// Normalized configuration.
    pub text: String,
    /// Lowercase hex SHA-256 over the UTF-8 bytes of `text`.
    pub hash: String,
}

/// A single ordered substitution rule.
struct Rule {
    re: Regex,
    rep: &'static str,
}

impl Rule {
    fn new(pattern: &str, rep: &'static str) -> Self {
        // Patterns are compile-time constants; a malformed one is a
        // programmer error caught by the rule-set tests.
        Self {
            re: Regex::new(pattern).expect("built-in scrub pattern is valid"),
            rep,
        }
    }

    /// Returns the rewritten text, or `None` when nothing matched.
    fn apply(&self, text: &str) -> Option<String> {
        match self.re.replace_all(text, self.rep) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule sets
// ---------------------------------------------------------------------------

/// Cisco-style CLI platforms: ios, nxos, eos, dellos10.
static CISCO_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Device uptime line; the tail drifts every second.
        Rule::new(r"(?m)^(?P<head>.*\buptime is ).+$", "${head}<uptime>"),
        // Header change stamps written by the device on every save.
        Rule::new(
            r"(?m)^(?P<head>! Last configuration change at ).+$",
            "${head}<timestamp>",
        ),
        Rule::new(
            r"(?m)^(?P<head>! NVRAM config last updated at ).+$",
            "${head}<timestamp>",
        ),
        // Crystal-drift calibration; a duration, so it scrubs to <uptime>.
        Rule::new(r"(?m)^(?P<head>ntp clock-period )\d+$", "${head}<uptime>"),
        // PKI certificate blocks: from the `certificate` opener through the
        // nearest `quit` terminator. Non-greedy so a following block is
        // never consumed.
        Rule::new(
            r"(?ms)^(?P<indent>[ \t]*)certificate (?:ca |self-signed )?[0-9A-Fa-f]+[ \t]*\n.*?^[ \t]*quit[ \t]*$",
            "${indent}certificate <serial>\n${indent}quit",
        ),
        // Vendor serial / module identifiers in show-version style headers.
        Rule::new(
            r"(?m)^(?P<head>Processor board ID ).+$",
            "${head}<serial>",
        ),
        Rule::new(
            r"(?mi)^(?P<head>[ \t]*(?:system )?serial number[ \t]*:[ \t]*).+$",
            "${head}<serial>",
        ),
    ]
});

/// PAN-OS system-info fields embedded in exports.
static PANOS_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(r"(?m)^(?P<head>[ \t]*serial:[ \t]*).+$", "${head}<serial>"),
        Rule::new(r"(?m)^(?P<head>[ \t]*uptime:[ \t]*).+$", "${head}<uptime>"),
        Rule::new(
            r"(?m)^(?P<head>[ \t]*(?:app|threat|av|wildfire)-version:[ \t]*).+$",
            "${head}<version>",
        ),
    ]
});

/// FortiOS per-object churn and build headers.
static FORTIOS_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new(r"(?m)^(?P<head>[ \t]*set uuid ).+$", "${head}<uuid>"),
        Rule::new(r"(?m)^(?P<head>[ \t]*set lastupdate ).+$", "${head}<timestamp>"),
        Rule::new(r"(?m)^(?P<head>#conf_file_ver=).+$", "${head}<version>"),
        Rule::new(r"(?m)^(?P<head>#buildno=).+$", "${head}<build>"),
        Rule::new(
            r"(?m)^(?P<head>#config-version=[^:\n]*-build)[0-9]+(?P<tail>.*)$",
            "${head}<build>${tail}",
        ),
    ]
});

/// Common pass, applied last on every platform.
static COMMON_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // Dotted-quad IPv4 literals.
        Rule::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b", "<ip-address>"),
        // ISO-8601 timestamps, with or without fraction and offset.
        Rule::new(
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<timestamp>",
        ),
    ]
});

fn platform_rules(platform: Platform) -> &'static [Rule] {
    match platform {
        Platform::Ios | Platform::Nxos | Platform::Eos | Platform::DellOs10 => &CISCO_RULES,
        Platform::Panos => &PANOS_RULES,
        Platform::Fortios => &FORTIOS_RULES,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Normalize `raw` for `platform` and compute the content hash.
///
/// Platform rules run first, then the common pass. Inputs with no dynamic
/// fields round-trip unchanged. Empty input yields empty text and the
/// SHA-256 of empty bytes.
#[must_use]
pub fn scrub(raw: &str, platform: Platform) -> Scrubbed {
    let mut text = raw.to_string();
    for rule in platform_rules(platform).iter().chain(COMMON_RULES.iter()) {
        if let Some(replaced) = rule.apply(&text) {
            text = replaced;
        }
    }
    let hash = sha256_hex(text.as_bytes());
    Scrubbed { text, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn all_rule_sets_compile() {
        for platform in Platform::ALL {
            assert!(!platform_rules(platform).is_empty());
        }
        assert_eq!(COMMON_RULES.len(), 2);
    }

    #[test]
    fn empty_input_hashes_empty_bytes() {
        let out = scrub("", Platform::Ios);
        assert_eq!(out.text, "");
        assert_eq!(out.hash, EMPTY_SHA256);
    }

    #[test]
    fn static_config_round_trips_unchanged() {
        let raw = "hostname core-1\ninterface Ethernet1\n no shutdown\n";
        let out = scrub(raw, Platform::Eos);
        assert_eq!(out.text, raw);
    }

    #[test]
    fn ios_uptime_line_is_scrubbed() {
        let out = scrub("core-1 uptime is 42 weeks, 1 day\n", Platform::Ios);
        assert_eq!(out.text, "core-1 uptime is <uptime>\n");
    }

    #[test]
    fn ios_last_configuration_change_is_scrubbed() {
        let raw = "! Last configuration change at 12:00:01 EST Mon Jan 1 2024 by admin\n";
        let out = scrub(raw, Platform::Ios);
        assert_eq!(out.text, "! Last configuration change at <timestamp>\n");
    }

    #[test]
    fn ntp_clock_period_is_scrubbed() {
        let out = scrub("ntp clock-period 17179738\n", Platform::Ios);
        assert_eq!(out.text, "ntp clock-period <uptime>\n");
    }

    #[test]
    fn certificate_block_collapses_to_stub() {
        let raw = "\
crypto pki certificate chain TP-self-signed
 certificate self-signed 01
  30820330 308202D9 A0030201 02020101
  300D0609 2A864886 F70D0101 04050030
  quit
!
hostname core-1
";
        let out = scrub(raw, Platform::Ios);
        assert!(out.text.contains(" certificate <serial>\n quit"));
        assert!(!out.text.contains("30820330"));
        assert!(out.text.contains("hostname core-1"));
    }

    #[test]
    fn certificate_rule_stops_at_nearest_quit() {
        let raw = "\
 certificate ca 02
  ABCDEF01
  quit
 certificate 03
  12345678
  quit
end
";
        let out = scrub(raw, Platform::Ios);
        // Both blocks collapse independently; `end` survives.
        assert_eq!(out.text.matches("certificate <serial>").count(), 2);
        assert!(out.text.ends_with("end\n"));
    }

    #[test]
    fn processor_board_id_is_scrubbed() {
        let out = scrub("Processor board ID FTX1628AHJ9\n", Platform::Ios);
        assert_eq!(out.text, "Processor board ID <serial>\n");
    }

    #[test]
    fn panos_fields_are_scrubbed() {
        let raw = "\
serial: 0123456789
uptime: 12 days, 3:45:12
app-version: 8556-7343
threat-version: 8556-7343
";
        let out = scrub(raw, Platform::Panos);
        assert_eq!(
            out.text,
            "serial: <serial>\nuptime: <uptime>\napp-version: <version>\nthreat-version: <version>\n"
        );
    }

    #[test]
    fn fortios_uuid_and_build_are_scrubbed() {
        let raw = "\
#config-version=FGT60D-5.2.2-FW-build642-141003:opmode=0
#conf_file_ver=2306222306222022
#buildno=642
config firewall address
    edit \"lan\"
        set uuid 8f2fae7c-5f92-51e9-ad1a-03dc6d8cade5
    next
end
";
        let out = scrub(raw, Platform::Fortios);
        assert!(out.text.contains("#config-version=FGT60D-5.2.2-FW-build<build>-141003"));
        assert!(out.text.contains("#conf_file_ver=<version>"));
        assert!(out.text.contains("#buildno=<build>"));
        assert!(out.text.contains("set uuid <uuid>"));
    }

    #[test]
    fn common_pass_scrubs_ipv4_and_iso_timestamps() {
        let raw = "ntp server 10.1.2.3\nsnapshot taken 2024-01-01T12:00:01Z\n";
        let out = scrub(raw, Platform::Fortios);
        assert_eq!(
            out.text,
            "ntp server <ip-address>\nsnapshot taken <timestamp>\n"
        );
    }

    #[test]
    fn hash_is_stable_across_dynamic_field_changes() {
        let monday = "hostname core-1\ncore-1 uptime is 42 weeks, 1 day\nntp server 10.0.0.1\n";
        let tuesday = "hostname core-1\ncore-1 uptime is 42 weeks, 2 days\nntp server 10.0.0.1\n";
        let a = scrub(monday, Platform::Ios);
        let b = scrub(tuesday, Platform::Ios);
        assert_eq!(a.text, b.text);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn differing_static_content_differs_in_hash() {
        let a = scrub("hostname core-1\n", Platform::Ios);
        let b = scrub("hostname core-2\n", Platform::Ios);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn scrub_is_idempotent_on_realistic_input() {
        let raw = "\
! Last configuration change at 12:00:01 EST Mon Jan 1 2024 by admin
hostname core-1
core-1 uptime is 1 week, 3 days
interface Loopback0
 ip address 192.168.0.1 255.255.255.255
ntp clock-period 17179738
";
        let once = scrub(raw, Platform::Ios);
        let twice = scrub(&once.text, Platform::Ios);
        assert_eq!(once.text, twice.text);
        assert_eq!(once.hash, twice.hash);
    }

    #[test]
    fn hash_matches_sha256_of_text() {
        let out = scrub("hostname x\n", Platform::Nxos);
        assert_eq!(out.hash, sha256_hex(out.text.as_bytes()));
        assert_eq!(out.hash.len(), 64);
    }
}
