//! Authentication Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage-assigned user identifier
pub type UserId = i64;

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    pub github_id: Option<String>,
    pub google_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account data before the repository assigns ID and timestamps
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub login: String,
    pub password_hash: String,
    pub github_id: Option<String>,
    pub google_id: Option<String>,
}

impl NewUser {
    pub fn new(email: String, login: String, password_hash: String) -> Self {
        Self {
            email,
            login,
            password_hash,
            github_id: None,
            google_id: None,
        }
    }
}

/// Single-use email confirmation record as kept in the flow cache.
/// The code itself is never stored, only its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFlow {
    pub flow_id: String,
    pub user_id: UserId,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub failed_attempts: u32,
}

/// What the caller gets back from issuing a flow; the code goes to the user
#[derive(Debug, Clone)]
pub struct IssuedFlow {
    pub flow_id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Refresh-token record. One per login, plus one per rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: UserId,
    pub client_id: String,
    pub token_hash: String,
    /// Id of the session created at login; shared by the whole rotation chain
    pub chain_id: Uuid,
    pub predecessor_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Live,
    Rotated,
    Revoked,
    Expired,
}

impl Session {
    /// Rotation wins over revocation: a rotated token that shows up again is
    /// a reuse signal even after its chain has been revoked.
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.rotated_at.is_some() {
            SessionState::Rotated
        } else if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.expires_at <= now {
            SessionState::Expired
        } else {
            SessionState::Live
        }
    }
}

/// Access + refresh token pair handed to clients
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Successful login result
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user: User,
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    /// Session the token was minted for
    pub sid: String,
    /// Client the session is bound to
    pub cid: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<UserId> {
        self.sub.parse().ok()
    }
}
