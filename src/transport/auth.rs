//! Admin API Authentication

use super::types::ApiError;
use crate::auth::crypto;
use crate::config::AdminConfig;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Checks the admin API key
pub struct AdminAuth {
    key_digest: Option<String>,
}

impl AdminAuth {
    pub fn new(config: &AdminConfig) -> Self {
        Self {
            key_digest: config
                .api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .map(crypto::digest),
        }
    }

    /// Compares digests so timing does not follow the key's bytes
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.key_digest else {
            return false;
        };

        match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            Some(provided) => crypto::digest(provided) == *expected,
            None => false,
        }
    }
}

/// Authentication middleware function
pub async fn admin_auth_middleware(
    State(auth): State<Arc<AdminAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if auth.authenticate(request.headers()) {
        debug!("Admin API key accepted");
        Ok(next.run(request).await)
    } else {
        warn!("Admin API authentication failed");
        Err(ApiError::unauthenticated("missing or invalid API key"))
    }
}
