//! HTTP surface tests driven through the router

use authgate::auth::{AuthService, ChannelNotifier, VerificationNotice};
use authgate::config::{AdminConfig, Config, HashingConfig};
use authgate::metrics::AuthMetrics;
use authgate::storage::Stores;
use authgate::transport::{AppState, AuthApi};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

const SIGNING_KEY: &[u8] = b"integration-test-signing-key-0123456789";
const ADMIN_KEY: &str = "admin-test-key";

struct TestApp {
    router: Router,
    codes: UnboundedReceiver<VerificationNotice>,
}

fn app_with(request_timeout: Duration, admin: AdminConfig, hashing: HashingConfig) -> TestApp {
    let config = Config {
        hashing,
        ..Default::default()
    };
    let (notifier, codes) = ChannelNotifier::new();
    let metrics = Arc::new(AuthMetrics::new().unwrap());
    let service = AuthService::build(
        &config,
        SIGNING_KEY,
        Stores::memory(),
        Arc::new(notifier),
        metrics,
    )
    .unwrap();

    let state = AppState::new(Arc::new(service), request_timeout, true);
    TestApp {
        router: AuthApi::create_router(state, &admin),
        codes,
    }
}

fn app() -> TestApp {
    app_with(
        Duration::from_secs(10),
        AdminConfig {
            enabled: true,
            api_key: Some(ADMIN_KEY.to_string()),
        },
        HashingConfig::fast_for_tests(),
    )
}

async fn post(router: &Router, uri: &str, body: Value, api_key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn register_and_verify(app: &mut TestApp) -> Value {
    let (status, body) = post(
        &app.router,
        "/v1/auth/register",
        json!({"email": "a@b.com", "login": "alice", "password": "Secret123!"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let notice = app.codes.recv().await.unwrap();
    let (status, _) = post(
        &app.router,
        "/v1/auth/verify-email",
        json!({"flow_id": notice.flow_id, "code": notice.code}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["user"].clone()
}

#[tokio::test]
async fn test_full_flow_over_http() {
    let mut app = app();

    let (status, body) = post(
        &app.router,
        "/v1/auth/register",
        json!({"email": "a@b.com", "login": "alice", "password": "Secret123!"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email_verified"], json!(false));
    assert!(body["user"].get("password_hash").is_none());

    let (status, body) = post(
        &app.router,
        "/v1/auth/login",
        json!({"email": "a@b.com", "password": "Secret123!", "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "UNAUTHENTICATED");
    assert_eq!(body["code"], "authentication_failed");
    assert_eq!(body["message"], "email not verified");

    let notice = app.codes.recv().await.unwrap();
    let (status, _) = post(
        &app.router,
        "/v1/auth/verify-email",
        json!({"flow_id": notice.flow_id, "code": notice.code}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, login) = post(
        &app.router,
        "/v1/auth/login",
        json!({"email": "a@b.com", "password": "Secret123!", "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let t0 = login["refresh_token"].as_str().unwrap().to_string();
    assert!(login["access_token"].is_string());
    assert_eq!(login["user"]["email_verified"], json!(true));

    let (status, body) = post(
        &app.router,
        "/v1/auth/introspect",
        json!({"access_token": login["access_token"]}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], json!(true));
    assert_eq!(body["client_id"], "web");

    let (status, refreshed) = post(
        &app.router,
        "/v1/auth/refresh",
        json!({"refresh_token": t0, "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(refreshed["refresh_token"].as_str().unwrap(), t0);

    let (status, body) = post(
        &app.router,
        "/v1/auth/refresh",
        json!({"refresh_token": t0, "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "reused_token");

    let (status, _) = post(
        &app.router,
        "/v1/auth/logout",
        json!({"refresh_token": refreshed["refresh_token"], "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_error_status_mapping() {
    let mut app = app();
    register_and_verify(&mut app).await;

    let (status, body) = post(
        &app.router,
        "/v1/auth/register",
        json!({"email": "a@b.com", "login": "other", "password": "Secret123!"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "ALREADY_EXISTS");

    let (status, body) = post(&app.router, "/v1/auth/login", json!({"email": "a@b.com"}), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "INVALID_ARGUMENT");

    let (status, body) = post(
        &app.router,
        "/v1/auth/verify-email",
        json!({"flow_id": "missing", "code": "000000"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_code");

    let (status, body) = post(
        &app.router,
        "/v1/auth/refresh",
        json!({"refresh_token": "never-issued"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");

    let (status, body) = post(&app.router, "/v1/auth/password-reset", json!({}), None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["status"], "UNIMPLEMENTED");
}

#[tokio::test]
async fn test_malformed_json_is_invalid_argument() {
    let app = app();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_logout_all_requires_api_key() {
    let mut app = app();
    let user = register_and_verify(&mut app).await;
    let id = user["id"].as_i64().unwrap();

    let (status, _) = post(
        &app.router,
        "/v1/auth/login",
        json!({"email": "a@b.com", "password": "Secret123!", "client_id": "web"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/v1/admin/users/{id}/logout-all");
    let (status, body) = post(&app.router, &uri, json!({}), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_api_key");

    let (status, _) = post(&app.router, &uri, json!({}), Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = post(&app.router, &uri, json!({}), Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], json!(1));

    let (status, _) = post(
        &app.router,
        "/v1/admin/users/9999/logout-all",
        json!({}),
        Some(ADMIN_KEY),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_absent_when_disabled() {
    let app = app_with(
        Duration::from_secs(10),
        AdminConfig::default(),
        HashingConfig::fast_for_tests(),
    );
    let (status, _) = post(
        &app.router,
        "/v1/admin/users/1/logout-all",
        json!({}),
        Some(ADMIN_KEY),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_deadline_exceeded() {
    // hashing this password takes far longer than the deadline
    let slow = HashingConfig {
        memory_kib: 64 * 1024,
        iterations: 8,
        parallelism: 1,
    };
    let app = app_with(Duration::from_millis(5), AdminConfig::default(), slow);
    let (status, body) = post(
        &app.router,
        "/v1/auth/register",
        json!({"email": "a@b.com", "login": "alice", "password": "Secret123!"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["status"], "DEADLINE_EXCEEDED");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let mut app = app();
    register_and_verify(&mut app).await;

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("healthy"));

    let (status, body) = get(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("authgate_registrations_total 1"));
    assert!(body.contains(r#"authgate_requests_total{operation="register",status="OK"} 1"#));
}
