// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vendor API flows against a mocked appliance endpoint.

use cv_core::{CancellationToken, Device, ErrorKind, OutcomePayload, Platform};
use cv_creds::Credentials;
use cv_transport::{ApiPool, BackupTarget};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target(address: String, platform: Platform) -> BackupTarget {
    BackupTarget {
        device: Device {
            id: Uuid::new_v4(),
            hostname: "fw-1".into(),
            address,
            platform,
            site_id: Uuid::nil(),
            credential_set_id: None,
            tls_verify: None,
            enabled: true,
        },
        credentials: Credentials {
            username: "netops".into(),
            password: "pw".into(),
        },
    }
}

fn pool() -> ApiPool {
    ApiPool::new(4, Duration::from_secs(10), false).unwrap()
}

async fn run_one(pool: &ApiPool, target: BackupTarget) -> OutcomePayload {
    let mut rx = pool.run(vec![target], CancellationToken::new());
    let outcome = rx.recv().await.expect("one outcome");
    assert!(rx.recv().await.is_none());
    outcome.payload
}

#[tokio::test]
async fn panos_keygen_then_export() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "keygen"))
        .and(query_param("user", "netops"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<response status=\"success\"><result><key>THEKEY</key></result></response>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(query_param("type", "export"))
        .and(query_param("category", "configuration"))
        .and(query_param("key", "THEKEY"))
        .respond_with(ResponseTemplate::new(200).set_body_string("config { }\n"))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Panos)).await;
    match payload {
        OutcomePayload::Config(text) => assert_eq!(text, "config { }\n"),
        other => panic!("expected config, got {other:?}"),
    }
}

#[tokio::test]
async fn panos_keygen_403_is_auth_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Panos)).await;
    match payload {
        OutcomePayload::Failed(err) => assert_eq!(err.kind, ErrorKind::AuthRejected),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn panos_missing_key_is_auth_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<response status=\"error\"><msg>bad creds</msg></response>"),
        )
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Panos)).await;
    match payload {
        OutcomePayload::Failed(err) => {
            assert_eq!(err.kind, ErrorKind::AuthRejected);
            assert!(err.message.contains("<key>"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn panos_server_error_is_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Panos)).await;
    match payload {
        OutcomePayload::Failed(err) => assert_eq!(err.kind, ErrorKind::Protocol),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn fortios_login_token_in_body_then_backup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .and(body_partial_json(json!({ "username": "netops", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "tok-123" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/monitor/system/config/backup"))
        .and(query_param("scope", "global"))
        .and(wiremock::matchers::header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#config-version=X\n"))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Fortios)).await;
    match payload {
        OutcomePayload::Config(text) => assert!(text.starts_with("#config-version")),
        other => panic!("expected config, got {other:?}"),
    }
}

#[tokio::test]
async fn fortios_login_token_in_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "access_token=tok-456; Path=/; HttpOnly")
                .set_body_string("{}"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/monitor/system/config/backup"))
        .and(wiremock::matchers::header("authorization", "Bearer tok-456"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok\n"))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Fortios)).await;
    assert!(matches!(payload, OutcomePayload::Config(_)));
}

#[tokio::test]
async fn fortios_login_401_is_auth_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Fortios)).await;
    match payload {
        OutcomePayload::Failed(err) => assert_eq!(err.kind, ErrorKind::AuthRejected),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn fortios_tokenless_login_is_auth_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let payload = run_one(&pool(), target(server.uri(), Platform::Fortios)).await;
    match payload {
        OutcomePayload::Failed(err) => {
            assert_eq!(err.kind, ErrorKind::AuthRejected);
            assert!(err.message.contains("no token"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cli_platform_on_api_pool_is_protocol_error() {
    let payload = run_one(&pool(), target("http://127.0.0.1:1".into(), Platform::Ios)).await;
    match payload {
        OutcomePayload::Failed(err) => assert_eq!(err.kind, ErrorKind::Protocol),
        other => panic!("expected failure, got {other:?}"),
    }
}
