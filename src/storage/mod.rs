//! Storage Module
//!
//! Abstractions over the relational store (users, sessions) and the expiring
//! cache (verification flows). Every conditional transition lives inside the
//! store so that concurrent callers, including other service instances
//! sharing the same backend, cannot interleave between check and write.

pub mod memory;
pub mod sqlite;
pub mod sweeper;

pub use memory::{MemoryFlowCache, MemorySessionStore, MemoryUserRepository};
pub use sqlite::SqliteStore;
pub use sweeper::spawn_sweeper;

use crate::auth::{AuthError, NewUser, Session, SessionState, User, UserId, VerificationFlow};
use crate::config::{StorageBackend, StorageConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Durable account records. Email and login uniqueness is enforced here,
/// surfaced as `AuthError::Conflict`.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Assigns ID and timestamps and persists the record
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;

    async fn get_by_email(&self, email: &str) -> Result<User, AuthError>;

    async fn get_by_id(&self, id: UserId) -> Result<User, AuthError>;

    /// Idempotent; `updated_at` only moves on the actual false -> true flip
    async fn mark_email_verified(&self, id: UserId) -> Result<(), AuthError>;
}

/// Result of an atomic consume attempt on a flow record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(UserId),
    /// Unknown flow, or evicted by TTL
    Missing,
    /// Wrong code; the failure was counted
    Mismatch,
    /// Too many wrong codes
    Locked,
    Expired,
    AlreadyConsumed,
}

/// Expiring key/value cache holding verification flows
#[async_trait]
pub trait FlowCache: Send + Sync {
    /// Stores the record; the key disappears `ttl` from now
    async fn put(&self, flow: VerificationFlow, ttl: Duration) -> Result<(), AuthError>;

    /// Checks existence, lock, expiry, consumption and code, and marks the
    /// record consumed, all in one atomic step
    async fn consume(
        &self,
        flow_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<ConsumeOutcome, AuthError>;

    /// Drops records whose TTL has passed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}

/// Result of a conditional rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated,
    /// The session was no longer the live leaf; carries what was observed
    NotLive(SessionState),
    Missing,
}

/// Durable refresh-token sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), AuthError>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError>;

    /// Marks `current` rotated only if it is still live, and inserts `next`
    /// in the same atomic step. Of two racing calls exactly one sees `Rotated`.
    async fn rotate(
        &self,
        current: Uuid,
        next: Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError>;

    /// Returns whether the session transitioned to revoked
    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError>;

    async fn revoke_chain(&self, chain_id: Uuid, now: DateTime<Utc>) -> Result<usize, AuthError>;

    async fn revoke_all_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize, AuthError>;

    /// Drops sessions past their expiry
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}

/// The three backing stores the core is built over
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub flows: Arc<dyn FlowCache>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// Process-local stores; state is lost on restart
    pub fn memory() -> Self {
        Self {
            users: Arc::new(MemoryUserRepository::new()),
            flows: Arc::new(MemoryFlowCache::new()),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    /// All three backed by one SQLite database
    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            users: store.clone(),
            flows: store.clone(),
            sessions: store,
        }
    }

    /// Open whatever the configuration selects
    pub async fn open(config: &StorageConfig) -> Result<Self, AuthError> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::memory()),
            StorageBackend::Sqlite => {
                let store = SqliteStore::open(&config.database_path, config.busy_timeout).await?;
                Ok(Self::sqlite(store))
            }
        }
    }

    /// Returns (flows, sessions) purged
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<(usize, usize), AuthError> {
        let flows = self.flows.purge_expired(now).await?;
        let sessions = self.sessions.purge_expired(now).await?;
        Ok((flows, sessions))
    }
}
