//! Remote-call Handlers

use super::types::*;
use crate::auth::{AuthError, AuthService, UserId};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::{header, StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AuthService>,
    /// Deadline for every operation
    pub request_timeout: Duration,
    pub metrics_enabled: bool,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<AuthService>, request_timeout: Duration, metrics_enabled: bool) -> Self {
        Self {
            service,
            request_timeout,
            metrics_enabled,
            start_time: Instant::now(),
        }
    }

    /// Run one operation under the deadline and record its outcome. Hitting
    /// the deadline drops the operation's future, cancelling its storage work.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(AuthError::from(elapsed)),
        };

        let status = match &result {
            Ok(_) => "OK",
            Err(err) => {
                debug!(operation, code = err.code(), "Call failed");
                err.status().as_str()
            }
        };
        self.service
            .metrics()
            .record_request(operation, status, start.elapsed());

        result.map_err(ApiError::from)
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::invalid_argument(rejection.body_text()))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let req = body(payload)?;
    let user = state
        .call(
            "register",
            state.service.register(&req.email, &req.login, &req.password),
        )
        .await?;
    Ok(Json(RegisterResponse { user }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let req = body(payload)?;
    state
        .call("verify_email", state.service.verify_email(&req.flow_id, &req.code))
        .await?;
    Ok(Json(Empty {}))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let req = body(payload)?;
    let outcome = state
        .call(
            "login",
            state.service.login(&req.email, &req.password, &req.client_id),
        )
        .await?;
    Ok(Json(LoginResponse {
        tokens: outcome.tokens,
        user: outcome.user,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<crate::auth::TokenPair>, ApiError> {
    let req = body(payload)?;
    let tokens = state
        .call(
            "refresh_token",
            state.service.refresh_token(&req.refresh_token, &req.client_id),
        )
        .await?;
    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let req = body(payload)?;
    state
        .call(
            "logout",
            state.service.logout(&req.refresh_token, &req.client_id),
        )
        .await?;
    Ok(Json(Empty {}))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    payload: Result<Json<ResendVerificationRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let req = body(payload)?;
    state
        .call(
            "resend_verification",
            state.service.resend_verification(&req.email),
        )
        .await?;
    Ok(Json(Empty {}))
}

pub async fn introspect(
    State(state): State<AppState>,
    payload: Result<Json<IntrospectRequest>, JsonRejection>,
) -> Result<Json<IntrospectResponse>, ApiError> {
    let req = body(payload)?;
    let service = state.service.clone();
    let response = state
        .call("introspect", async move {
            IntrospectResponse::from_claims(service.introspect(&req.access_token)?)
        })
        .await?;
    Ok(Json(response))
}

pub async fn logout_all(
    State(state): State<AppState>,
    user_id: Result<Path<UserId>, PathRejection>,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let Path(user_id) =
        user_id.map_err(|_| ApiError::invalid_argument("user id must be an integer"))?;
    let revoked = state
        .call("logout_all", state.service.logout_all(user_id))
        .await?;
    Ok(Json(LogoutAllResponse { revoked }))
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus scrape endpoint
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.metrics_enabled {
        return ApiError::unimplemented("/metrics").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().export_prometheus(),
    )
        .into_response()
}

/// Anything not routed
pub async fn unimplemented(uri: Uri) -> ApiError {
    ApiError::unimplemented(uri.path())
}
