//! Wire types for the remote-call surface

use crate::auth::{AuthError, Claims, Status, TokenPair, User, UserId};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

// Missing fields deserialize as empty strings so that the service, not the
// JSON extractor, reports them as InvalidArgument.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub email: String,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyEmailRequest {
    pub flow_id: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub client_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub client_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogoutRequest {
    pub refresh_token: String,
    pub client_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IntrospectRequest {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
}

/// Returned by operations with nothing to report
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Serialize)]
pub struct IntrospectResponse {
    pub active: bool,
    pub user_id: UserId,
    pub session_id: String,
    pub client_id: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IntrospectResponse {
    pub fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let user_id = claims.user_id().ok_or(AuthError::InvalidToken)?;
        let issued_at = Utc
            .timestamp_opt(claims.iat, 0)
            .single()
            .ok_or(AuthError::InvalidToken)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthError::InvalidToken)?;

        Ok(Self {
            active: true,
            user_id,
            session_id: claims.sid,
            client_id: claims.cid,
            issuer: claims.iss,
            issued_at,
            expires_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Error body: `{ "status": ..., "code": ..., "message": ... }`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub status: String,
    pub code: String,
    pub message: String,
}

/// Error as it leaves the transport
#[derive(Debug)]
pub struct ApiError {
    pub status: Status,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn unimplemented(path: &str) -> Self {
        Self {
            status: Status::Unimplemented,
            code: "unimplemented",
            message: format!("{path} is not implemented"),
        }
    }

    pub fn unauthenticated(message: &str) -> Self {
        Self {
            status: Status::Unauthenticated,
            code: "invalid_api_key",
            message: message.to_string(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            status: Status::InvalidArgument,
            code: "validation_failed",
            message: message.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        // Only the generic message leaves the process
        if let AuthError::Internal(cause) = &err {
            error!(error = ?cause, "Internal error");
        }

        Self {
            status: err.status(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

pub fn http_status(status: Status) -> StatusCode {
    match status {
        Status::InvalidArgument => StatusCode::BAD_REQUEST,
        Status::AlreadyExists => StatusCode::CONFLICT,
        Status::NotFound => StatusCode::NOT_FOUND,
        Status::Unauthenticated => StatusCode::UNAUTHORIZED,
        Status::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Status::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Status::Unimplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: self.status.as_str().to_string(),
            code: self.code.to_string(),
            message: self.message,
        };
        (http_status(self.status), Json(body)).into_response()
    }
}
