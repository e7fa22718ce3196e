// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the scrubber laws: determinism, idempotence, and
//! hash/text agreement on arbitrary input.

use cv_core::{Platform, sha256_hex};
use cv_scrub::scrub;
use proptest::prelude::*;

fn any_platform() -> impl Strategy<Value = Platform> {
    prop::sample::select(Platform::ALL.to_vec())
}

/// Lines that look like the text the scrubber actually sees: config-ish
/// tokens, dynamic fields, and arbitrary printable noise.
fn config_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("hostname core-1".to_string()),
        Just("interface Ethernet1".to_string()),
        Just(" ip address 10.1.2.3 255.255.255.0".to_string()),
        Just("core-1 uptime is 17 weeks, 4 days".to_string()),
        Just("! Last configuration change at 09:00:00 UTC Tue Feb 6 2024 by ops".to_string()),
        Just("ntp clock-period 17179738".to_string()),
        Just("set uuid 8f2fae7c-5f92-51e9-ad1a-03dc6d8cade5".to_string()),
        Just("snapshot 2024-02-06T09:00:00Z".to_string()),
        "[ -~]{0,60}",
    ]
}

fn config_text() -> impl Strategy<Value = String> {
    prop::collection::vec(config_line(), 0..30).prop_map(|lines| {
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    })
}

proptest! {
    #[test]
    fn scrub_is_deterministic(raw in config_text(), platform in any_platform()) {
        let a = scrub(&raw, platform);
        let b = scrub(&raw, platform);
        prop_assert_eq!(a.text, b.text);
        prop_assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn scrub_is_idempotent(raw in config_text(), platform in any_platform()) {
        let once = scrub(&raw, platform);
        let twice = scrub(&once.text, platform);
        prop_assert_eq!(&twice.text, &once.text);
        prop_assert_eq!(&twice.hash, &once.hash);
    }

    #[test]
    fn hash_is_sha256_of_scrubbed_text(raw in config_text(), platform in any_platform()) {
        let out = scrub(&raw, platform);
        prop_assert_eq!(out.hash, sha256_hex(out.text.as_bytes()));
    }

    #[test]
    fn output_never_gains_unrelated_lines(raw in config_text(), platform in any_platform()) {
        let out = scrub(&raw, platform);
        prop_assert!(out.text.lines().count() <= raw.lines().count());
    }
}
