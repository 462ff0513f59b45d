//! Security events
//!
//! Everything that signals possible credential theft or an account-wide
//! action goes through here, on the `security` tracing target, so it can be
//! routed separately from ordinary request logs.

use crate::auth::UserId;
use tracing::warn;
use uuid::Uuid;

/// Security event types for logging and monitoring
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    /// A rotated refresh token was presented again; its chain was revoked
    RefreshTokenReuse {
        user_id: UserId,
        session_id: Uuid,
        chain_id: Uuid,
        client_id: String,
        revoked: usize,
    },
    /// Every live session of a user was revoked
    AllSessionsRevoked { user_id: UserId, revoked: usize },
    /// A verification flow hit its wrong-code limit
    VerificationLocked { flow_id: String },
}

impl SecurityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::RefreshTokenReuse { .. } => "refresh_token_reuse",
            SecurityEvent::AllSessionsRevoked { .. } => "all_sessions_revoked",
            SecurityEvent::VerificationLocked { .. } => "verification_locked",
        }
    }

    /// Emit the event
    pub fn record(&self) {
        match self {
            SecurityEvent::RefreshTokenReuse {
                user_id,
                session_id,
                chain_id,
                client_id,
                revoked,
            } => {
                warn!(
                    target: "security",
                    event = self.kind(),
                    user_id = %user_id,
                    session_id = %session_id,
                    chain_id = %chain_id,
                    client_id = %client_id,
                    revoked,
                    "Refresh token reuse detected, rotation chain revoked"
                );
            }
            SecurityEvent::AllSessionsRevoked { user_id, revoked } => {
                warn!(
                    target: "security",
                    event = self.kind(),
                    user_id = %user_id,
                    revoked,
                    "All sessions revoked for user"
                );
            }
            SecurityEvent::VerificationLocked { flow_id } => {
                warn!(
                    target: "security",
                    event = self.kind(),
                    flow_id = %flow_id,
                    "Verification flow locked after too many wrong codes"
                );
            }
        }
    }
}
