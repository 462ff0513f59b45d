//! Authentication Service
//!
//! Orchestrates the hasher, user repository, verification flows and token
//! manager into the user-facing operations. Input validation and
//! normalisation happen here; the components below trust their arguments.

use super::hasher::{Argon2Hasher, PasswordHasher};
use super::notify::{self, Notifier, VerificationNotice};
use super::tokens::{AccessTokenSigner, TokenManager};
use super::verification::VerificationFlowStore;
use super::{AuthError, Claims, LoginOutcome, NewUser, TokenPair, User, UserId};
use crate::config::{Config, PasswordPolicy};
use crate::metrics::{AuthMetrics, OUTCOME_OK};
use crate::storage::{Stores, UserRepository};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const MAX_LOGIN_LEN: usize = 64;
/// Verified against when the email is unknown, so both login failures cost
/// one Argon2 verification
const DUMMY_PASSWORD: &str = "authgate-dummy-password";

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    flows: VerificationFlowStore,
    tokens: TokenManager,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
    policy: PasswordPolicy,
    metrics: Arc<AuthMetrics>,
    email_pattern: Regex,
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        flows: VerificationFlowStore,
        tokens: TokenManager,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
        policy: PasswordPolicy,
        metrics: Arc<AuthMetrics>,
    ) -> Result<Self, AuthError> {
        let email_pattern = Regex::new(EMAIL_PATTERN).map_err(AuthError::internal)?;
        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?;
        Ok(Self {
            users,
            flows,
            tokens,
            hasher,
            notifier,
            policy,
            metrics,
            email_pattern,
            dummy_hash,
        })
    }

    /// Wire the whole graph from configuration
    pub fn build(
        config: &Config,
        signing_key: &[u8],
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<AuthMetrics>,
    ) -> Result<Self, AuthError> {
        let hasher = Arc::new(Argon2Hasher::new(&config.hashing)?);
        let flows = VerificationFlowStore::new(stores.flows, config.verification.clone());
        let signer = AccessTokenSigner::new(signing_key, &config.tokens)?;
        let tokens = TokenManager::new(stores.sessions, signer, &config.tokens, metrics.clone())?;

        Self::new(
            stores.users,
            flows,
            tokens,
            hasher,
            notifier,
            config.password_policy.clone(),
            metrics,
        )
    }

    pub fn metrics(&self) -> &Arc<AuthMetrics> {
        &self.metrics
    }

    /// Create an unverified account and send it a verification code
    pub async fn register(
        &self,
        email: &str,
        login: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let email = self.validate_email(email)?;
        let login = login.trim();
        if login.is_empty() {
            return Err(AuthError::validation("login is required"));
        }
        if login.chars().count() > MAX_LOGIN_LEN {
            return Err(AuthError::validation(format!(
                "login must be at most {MAX_LOGIN_LEN} characters"
            )));
        }
        self.validate_password(password)?;

        let password_hash = self.hash_password(password).await?;
        let user = self
            .users
            .create(NewUser::new(email, login.to_string(), password_hash))
            .await?;
        self.metrics.record_registration();
        info!(user_id = %user.id, "Registered user");

        self.send_verification(&user).await?;
        Ok(user)
    }

    /// Consume a verification code and mark its owner verified
    pub async fn verify_email(&self, flow_id: &str, code: &str) -> Result<(), AuthError> {
        if flow_id.trim().is_empty() {
            return Err(AuthError::validation("flow_id is required"));
        }
        if code.trim().is_empty() {
            return Err(AuthError::validation("code is required"));
        }

        let result = self.consume_and_verify(flow_id.trim(), code.trim()).await;
        self.metrics.record_verification(outcome(&result));
        result
    }

    /// The code is spent once consumed. Marking the user runs as its own task
    /// and outlives a dropped caller; after a store failure, resend issues a
    /// new code.
    async fn consume_and_verify(&self, flow_id: &str, code: &str) -> Result<(), AuthError> {
        let user_id = self.flows.consume(flow_id, code).await?;

        let users = self.users.clone();
        tokio::spawn(async move { users.mark_email_verified(user_id).await }).await??;
        info!(user_id = %user_id, "Email verified");
        Ok(())
    }

    /// Check credentials and start a session for `client_id`
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client_id: &str,
    ) -> Result<LoginOutcome, AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::validation("email is required"));
        }
        if password.is_empty() {
            return Err(AuthError::validation("password is required"));
        }

        let result = self
            .authenticate(&normalize_email(email), password, client_id)
            .await;
        self.metrics.record_login(outcome(&result));
        result
    }

    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client_id: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let user = match self.users.get_by_email(email).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => {
                self.verify_password(self.dummy_hash.clone(), password)
                    .await?;
                return Err(AuthError::Authentication("invalid credentials"));
            }
            Err(err) => return Err(err),
        };

        if !self
            .verify_password(user.password_hash.clone(), password)
            .await?
        {
            debug!(user_id = %user.id, "Password mismatch");
            return Err(AuthError::Authentication("invalid credentials"));
        }

        if !user.email_verified {
            return Err(AuthError::Authentication("email not verified"));
        }

        let tokens = self.tokens.issue_tokens(user.id, client_id).await?;
        info!(user_id = %user.id, client_id = %client_id, "User logged in");
        Ok(LoginOutcome { tokens, user })
    }

    /// Rotate a refresh token. Reuse revokes the chain before the error
    /// comes back.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenPair, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::validation("refresh_token is required"));
        }

        let result = self.tokens.refresh(refresh_token, client_id).await;
        self.metrics.record_refresh(outcome(&result));
        result
    }

    /// Revoke one session. Unknown or already revoked tokens succeed.
    pub async fn logout(&self, refresh_token: &str, client_id: &str) -> Result<(), AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::validation("refresh_token is required"));
        }

        match self.tokens.revoke(refresh_token).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(client_id = %client_id, "Logout with unknown refresh token");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Revoke every session of an existing user
    pub async fn logout_all(&self, user_id: UserId) -> Result<usize, AuthError> {
        let user = self.users.get_by_id(user_id).await?;
        self.tokens.revoke_all(user.id).await
    }

    /// Issue a fresh code for an unverified account. Unknown emails succeed
    /// silently.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let email = self.validate_email(email)?;

        let user = match self.users.get_by_email(&email).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => {
                debug!("Resend requested for unknown email");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if user.email_verified {
            return Err(AuthError::conflict("email already verified"));
        }
        self.send_verification(&user).await
    }

    /// Validate an access token without touching storage
    pub fn introspect(&self, access_token: &str) -> Result<Claims, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::validation("access_token is required"));
        }
        self.tokens.introspect(access_token)
    }

    async fn send_verification(&self, user: &User) -> Result<(), AuthError> {
        let issued = self.flows.issue(user.id).await?;
        notify::dispatch(
            self.notifier.clone(),
            VerificationNotice {
                user_id: user.id,
                email: user.email.clone(),
                flow_id: issued.flow_id,
                code: issued.code,
                expires_at: issued.expires_at,
            },
        );
        Ok(())
    }

    fn validate_email(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::validation("email is required"));
        }
        if !self.email_pattern.is_match(&email) {
            return Err(AuthError::validation("email is malformed"));
        }
        Ok(email)
    }

    fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::validation("password is required"));
        }
        let len = password.chars().count();
        if len < self.policy.min_length || len > self.policy.max_length {
            return Err(AuthError::validation(format!(
                "password must be between {} and {} characters",
                self.policy.min_length, self.policy.max_length
            )));
        }
        Ok(())
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password)).await?
    }

    async fn verify_password(&self, hash: String, password: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&hash, &password)).await?)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn outcome<T>(result: &Result<T, AuthError>) -> &'static str {
    match result {
        Ok(_) => OUTCOME_OK,
        Err(err) => err.code(),
    }
}
