//! Integration tests for the gateway over real HTTP.
//!
//! A wiremock server plays the clinic API. These tests verify that:
//! - Login stores the token pair and authorizes later requests
//! - Concurrent 401s hit the refresh endpoint exactly once
//! - Rotated refresh tokens are persisted
//! - Rejected or malformed refresh answers clear the session
//! - Non-401 errors never touch the refresh endpoint

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use dentgate_core::{
    AuthError, AuthGateway, CredentialPair, CredentialStore, GatewayConfig, GatewayError,
    MemoryStore, RefreshError, RequestEnvelope, RequestKind, Secret, StatusCode,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path, query_param},
};

#[derive(Debug, Deserialize, PartialEq)]
struct Patient {
    id: u32,
    name: String,
}

fn gateway_for(server: &MockServer, store: Arc<MemoryStore>) -> AuthGateway {
    let config = GatewayConfig::default().with_base_url(format!("{}/api/", server.uri()));
    AuthGateway::new(config, store).unwrap()
}

fn logged_in() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_pair(CredentialPair::new("T1", "R1")))
}

/// Only `token` is accepted on `GET /api/{resource}`; everything else is 401.
async fn mount_resource(server: &MockServer, resource: &str, token: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/api/{}", resource)))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "name": "Ada",
        })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/{}", resource)))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_401s_refresh_once_over_http() {
    let server = MockServer::start().await;
    mount_resource(&server, "patients/1", "T2").await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(serde_json::json!({ "refreshToken": "R1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "accessToken": "T2" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in();
    let gateway = gateway_for(&server, store.clone());

    let (a, b, c) = tokio::join!(
        gateway.get_json::<Patient>("patients/1"),
        gateway.get_json::<Patient>("patients/1"),
        gateway.get_json::<Patient>("patients/1"),
    );

    for result in [a, b, c] {
        assert_eq!(
            result.unwrap(),
            Patient {
                id: 1,
                name: "Ada".to_string()
            }
        );
    }

    assert_eq!(gateway.coordinator().refresh_count(), 1);
    assert_eq!(store.get_access_token().unwrap().unwrap().expose(), "T2");
    assert_eq!(store.get_refresh_token().unwrap().unwrap().expose(), "R1");
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    mount_resource(&server, "appointments", "T2").await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "T2",
            "refreshToken": "R2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in();
    let gateway = gateway_for(&server, store.clone());

    let response = gateway
        .authorized_request(RequestEnvelope::get("appointments"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(store.get_refresh_token().unwrap().unwrap().expose(), "R2");
}

#[tokio::test]
async fn test_rejected_refresh_clears_session() {
    let server = MockServer::start().await;
    mount_resource(&server, "patients", "T2").await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in();
    let gateway = gateway_for(&server, store.clone());

    let err = gateway
        .authorized_request(RequestEnvelope::get("patients"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Auth(AuthError::RefreshFailed(RefreshError::Rejected { status: 401 }))
    ));
    assert!(!gateway.is_logged_in().unwrap());
}

#[tokio::test]
async fn test_malformed_refresh_success_is_a_failure() {
    let server = MockServer::start().await;
    mount_resource(&server, "patients", "T2").await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in();
    let gateway = gateway_for(&server, store.clone());

    let err = gateway
        .authorized_request(RequestEnvelope::get("patients"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Auth(AuthError::RefreshFailed(RefreshError::MalformedResponse { .. }))
    ));
    assert!(store.get_access_token().unwrap().is_none());
}

#[tokio::test]
async fn test_login_stores_pair_and_authorizes_requests() {
    let server = MockServer::start().await;
    mount_resource(&server, "patients/1", "L1").await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(serde_json::json!({
            "email": "front-desk@example.com",
            "password": "hunter2",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "L1",
            "refreshToken": "LR1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_for(&server, store.clone());

    gateway
        .login("front-desk@example.com", &Secret::new("hunter2"))
        .await
        .unwrap();
    assert!(gateway.is_logged_in().unwrap());

    let patient: Patient = gateway.get_json("patients/1").await.unwrap();
    assert_eq!(patient.name, "Ada");
    assert_eq!(gateway.coordinator().refresh_count(), 0);

    gateway.logout().unwrap();
    assert!(store.get_refresh_token().unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_login_never_refreshes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, logged_in());

    let err = gateway
        .login("front-desk@example.com", &Secret::new("wrong"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Auth(AuthError::Unauthorized {
            kind: RequestKind::Login
        })
    ));
}

#[tokio::test]
async fn test_login_without_refresh_token_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "L1" })),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_for(&server, store.clone());

    let err = gateway
        .login("front-desk@example.com", &Secret::new("hunter2"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidLoginResponse { .. }));
    assert!(store.get_access_token().unwrap().is_none());
}

#[tokio::test]
async fn test_server_errors_do_not_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/invoices"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = logged_in();
    let gateway = gateway_for(&server, store.clone());

    let err = gateway
        .authorized_request(RequestEnvelope::get("invoices"))
        .await
        .unwrap_err();

    match err {
        GatewayError::Status { status, body } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "database unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(gateway.is_logged_in().unwrap());
}

#[tokio::test]
async fn test_query_and_body_are_sent_on_replay() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .and(query_param("notify", "true"))
        .and(body_json(serde_json::json!({ "patientId": 1 })))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": 9,
            "name": "cleaning",
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/appointments"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "T2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, logged_in());

    let created: Patient = gateway
        .send_json(
            RequestEnvelope::post("appointments")
                .with_query("notify", "true")
                .with_body(serde_json::json!({ "patientId": 1 })),
        )
        .await
        .unwrap();

    assert_eq!(created.id, 9);
}
