//! Authentication Errors
//!
//! One typed error for every component of the core. Storage and cache
//! failures are wrapped as `Internal` and never shown to callers verbatim.

use thiserror::Error;

/// Transport-neutral status an error maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InvalidArgument,
    AlreadyExists,
    NotFound,
    Unauthenticated,
    DeadlineExceeded,
    Internal,
    Unimplemented,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::AlreadyExists => "ALREADY_EXISTS",
            Status::NotFound => "NOT_FOUND",
            Status::Unauthenticated => "UNAUTHENTICATED",
            Status::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Status::Internal => "INTERNAL",
            Status::Unimplemented => "UNIMPLEMENTED",
        }
    }
}

/// Errors produced by the authentication core
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Deliberately coarse: bad credential or unverified email
    #[error("{0}")]
    Authentication(&'static str),

    #[error("invalid verification code")]
    InvalidCode,

    #[error("code or token expired")]
    Expired,

    #[error("verification code already used")]
    AlreadyConsumed,

    #[error("invalid token")]
    InvalidToken,

    #[error("token revoked")]
    TokenRevoked,

    #[error("refresh token reuse detected")]
    ReusedToken,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AuthError::Conflict(message.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        AuthError::Internal(err.into())
    }

    /// Stable internal code, distinct per variant, for logs and error bodies
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation_failed",
            AuthError::Conflict(_) => "conflict",
            AuthError::NotFound(_) => "not_found",
            AuthError::Authentication(_) => "authentication_failed",
            AuthError::InvalidCode => "invalid_code",
            AuthError::Expired => "expired",
            AuthError::AlreadyConsumed => "already_consumed",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::ReusedToken => "reused_token",
            AuthError::DeadlineExceeded => "deadline_exceeded",
            AuthError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            AuthError::Validation(_) => Status::InvalidArgument,
            AuthError::Conflict(_) => Status::AlreadyExists,
            AuthError::NotFound(_) => Status::NotFound,
            AuthError::Authentication(_)
            | AuthError::InvalidCode
            | AuthError::Expired
            | AuthError::AlreadyConsumed
            | AuthError::InvalidToken
            | AuthError::TokenRevoked
            | AuthError::ReusedToken => Status::Unauthenticated,
            AuthError::DeadlineExceeded => Status::DeadlineExceeded,
            AuthError::Internal(_) => Status::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthError::NotFound(_))
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Internal(anyhow::Error::new(err).context("spawned task failed"))
    }
}

impl From<tokio::time::error::Elapsed> for AuthError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AuthError::DeadlineExceeded
    }
}
