//! Session/Token Manager
//!
//! Access tokens are HS256 JWTs checked without a storage lookup. Refresh
//! tokens are opaque random strings backed by a session record; only their
//! digest is stored. Every refresh rotates the session, and presenting a
//! rotated token again revokes the whole rotation chain.

use super::crypto;
use super::{AuthError, Claims, Session, SessionState, TokenPair, UserId};
use crate::config::TokenConfig;
use crate::metrics::AuthMetrics;
use crate::security::SecurityEvent;
use crate::storage::{RotateOutcome, SessionStore};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Signs and checks access tokens
pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl AccessTokenSigner {
    pub fn new(key: &[u8], config: &TokenConfig) -> Result<Self, AuthError> {
        let ttl = Duration::from_std(config.access_token_ttl).map_err(AuthError::internal)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            issuer: config.issuer.clone(),
            ttl,
        })
    }

    /// Mint an access token for `session`, valid from `now`
    pub fn sign(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: session.user_id.to_string(),
            sid: session.id.to_string(),
            cid: session.client_id.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::internal)?;
        Ok((token, expires_at))
    }

    /// Check signature, issuer and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.user_id().is_none() {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }
}

/// Issues, rotates and revokes token pairs
pub struct TokenManager {
    sessions: Arc<dyn SessionStore>,
    signer: AccessTokenSigner,
    refresh_ttl: Duration,
    metrics: Arc<AuthMetrics>,
}

impl TokenManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        signer: AccessTokenSigner,
        config: &TokenConfig,
        metrics: Arc<AuthMetrics>,
    ) -> Result<Self, AuthError> {
        let refresh_ttl = Duration::from_std(config.refresh_token_ttl).map_err(AuthError::internal)?;
        Ok(Self {
            sessions,
            signer,
            refresh_ttl,
            metrics,
        })
    }

    /// Start a new rotation chain for a fresh login
    pub async fn issue_tokens(
        &self,
        user_id: UserId,
        client_id: &str,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let refresh_token = crypto::refresh_token()?;

        let session = Session {
            id,
            user_id,
            client_id: client_id.to_string(),
            token_hash: crypto::digest(&refresh_token),
            chain_id: id,
            predecessor_id: None,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            rotated_at: None,
            revoked_at: None,
        };

        let pair = self.pair_for(&session, refresh_token, now)?;
        self.sessions.insert(session).await?;

        debug!(user_id = %user_id, session_id = %id, client_id = %client_id, "Issued token pair");
        Ok(pair)
    }

    /// Rotate `refresh_token` into a new pair. An empty `client_id` skips the
    /// client binding check.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenPair, AuthError> {
        let session = self
            .sessions
            .find_by_token_hash(&crypto::digest(refresh_token))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();
        match session.state(now) {
            SessionState::Rotated => return Err(self.handle_reuse(&session, now).await),
            SessionState::Revoked => return Err(AuthError::TokenRevoked),
            SessionState::Expired => return Err(AuthError::Expired),
            SessionState::Live => {}
        }

        if !client_id.is_empty() && client_id != session.client_id {
            debug!(session_id = %session.id, "Refresh token presented by a different client");
            return Err(AuthError::InvalidToken);
        }

        let next_token = crypto::refresh_token()?;
        let next = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            client_id: session.client_id.clone(),
            token_hash: crypto::digest(&next_token),
            chain_id: session.chain_id,
            predecessor_id: Some(session.id),
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            rotated_at: None,
            revoked_at: None,
        };
        let pair = self.pair_for(&next, next_token, now)?;
        let next_id = next.id;

        match self.sessions.rotate(session.id, next, now).await? {
            RotateOutcome::Rotated => {
                debug!(
                    user_id = %session.user_id,
                    from = %session.id,
                    to = %next_id,
                    "Rotated refresh token"
                );
                Ok(pair)
            }
            // Lost a race with a concurrent refresh of the same token
            RotateOutcome::NotLive(SessionState::Rotated) => {
                Err(self.handle_reuse(&session, now).await)
            }
            RotateOutcome::NotLive(SessionState::Revoked) => Err(AuthError::TokenRevoked),
            RotateOutcome::NotLive(SessionState::Expired) => Err(AuthError::Expired),
            RotateOutcome::NotLive(SessionState::Live) | RotateOutcome::Missing => {
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Revoke the whole chain before reporting reuse. If revocation fails,
    /// that failure is what the caller sees.
    ///
    /// The revocation runs as its own task: dropping the caller (a deadline,
    /// a closed connection) must not abandon it.
    async fn handle_reuse(&self, session: &Session, now: DateTime<Utc>) -> AuthError {
        let sessions = self.sessions.clone();
        let metrics = self.metrics.clone();
        let session = session.clone();

        let task = tokio::spawn(async move {
            metrics.record_token_reuse();

            let revoked = match sessions.revoke_chain(session.chain_id, now).await {
                Ok(revoked) => revoked,
                Err(err) => return err,
            };
            metrics.record_revocations("chain", revoked);

            SecurityEvent::RefreshTokenReuse {
                user_id: session.user_id,
                session_id: session.id,
                chain_id: session.chain_id,
                client_id: session.client_id,
                revoked,
            }
            .record();

            AuthError::ReusedToken
        });

        match task.await {
            Ok(err) => err,
            Err(join) => join.into(),
        }
    }

    /// Revoke the single session behind `refresh_token`
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        let session = self
            .sessions
            .find_by_token_hash(&crypto::digest(refresh_token))
            .await?
            .ok_or(AuthError::NotFound("session"))?;

        if self.sessions.revoke(session.id, Utc::now()).await? {
            self.metrics.record_revocations("session", 1);
            debug!(user_id = %session.user_id, session_id = %session.id, "Revoked session");
        }
        Ok(())
    }

    /// Revoke every live session of `user_id`
    pub async fn revoke_all(&self, user_id: UserId) -> Result<usize, AuthError> {
        let revoked = self
            .sessions
            .revoke_all_for_user(user_id, Utc::now())
            .await?;
        self.metrics.record_revocations("user", revoked);

        SecurityEvent::AllSessionsRevoked { user_id, revoked }.record();
        info!(user_id = %user_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    pub fn introspect(&self, access_token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(access_token)
    }

    fn pair_for(
        &self,
        session: &Session,
        refresh_token: String,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AuthError> {
        let (access_token, access_expires_at) = self.signer.sign(session, now)?;
        Ok(TokenPair {
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at: session.expires_at,
        })
    }
}
