//! Verification Flow Store
//!
//! Issues single-use email confirmation codes and consumes them through the
//! flow cache's atomic consume primitive.

use super::crypto;
use super::{AuthError, IssuedFlow, UserId, VerificationFlow};
use crate::config::VerificationConfig;
use crate::security::SecurityEvent;
use crate::storage::{ConsumeOutcome, FlowCache};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct VerificationFlowStore {
    cache: Arc<dyn FlowCache>,
    config: VerificationConfig,
}

impl VerificationFlowStore {
    pub fn new(cache: Arc<dyn FlowCache>, config: VerificationConfig) -> Self {
        Self { cache, config }
    }

    /// Create a flow for `user_id`. The returned code is the only copy in
    /// plaintext.
    pub async fn issue(&self, user_id: UserId) -> Result<IssuedFlow, AuthError> {
        let code = crypto::numeric_code(self.config.code_length)?;
        let code_ttl = chrono::Duration::from_std(self.config.code_ttl)
            .map_err(AuthError::internal)?;
        let expires_at = Utc::now() + code_ttl;

        let flow = VerificationFlow {
            flow_id: Uuid::new_v4().to_string(),
            user_id,
            code_hash: crypto::digest(&code),
            expires_at,
            consumed: false,
            failed_attempts: 0,
        };
        let flow_id = flow.flow_id.clone();

        // Keep the record past expiry so late attempts are told why
        let cache_ttl = self.config.code_ttl + self.config.retention;
        self.cache.put(flow, cache_ttl).await?;

        debug!(user_id = %user_id, flow_id = %flow_id, "Issued verification flow");
        Ok(IssuedFlow {
            flow_id,
            code,
            expires_at,
        })
    }

    /// Consume the flow, returning its owner. Unknown flows, wrong codes and
    /// locked flows are all `InvalidCode`.
    pub async fn consume(&self, flow_id: &str, code: &str) -> Result<UserId, AuthError> {
        let outcome = self
            .cache
            .consume(
                flow_id,
                &crypto::digest(code),
                Utc::now(),
                self.config.max_attempts,
            )
            .await?;

        match outcome {
            ConsumeOutcome::Consumed(user_id) => Ok(user_id),
            ConsumeOutcome::Missing | ConsumeOutcome::Mismatch => Err(AuthError::InvalidCode),
            ConsumeOutcome::Locked => {
                SecurityEvent::VerificationLocked {
                    flow_id: flow_id.to_string(),
                }
                .record();
                Err(AuthError::InvalidCode)
            }
            ConsumeOutcome::Expired => Err(AuthError::Expired),
            ConsumeOutcome::AlreadyConsumed => Err(AuthError::AlreadyConsumed),
        }
    }
}
