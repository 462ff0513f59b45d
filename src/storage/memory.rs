//! In-memory Stores
//!
//! Process-local implementations of the storage traits. Each operation takes
//! the lock once and never awaits while holding it, which makes every
//! conditional write atomic with respect to concurrent callers.

use super::{ConsumeOutcome, FlowCache, RotateOutcome, SessionStore, UserRepository};
use crate::auth::{AuthError, NewUser, Session, SessionState, User, UserId, VerificationFlow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct UserTable {
    next_id: UserId,
    users: HashMap<UserId, User>,
    by_email: HashMap<String, UserId>,
    by_login: HashMap<String, UserId>,
    by_external: HashMap<String, UserId>,
}

/// User repository over a hash map with unique indexes
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    table: Mutex<UserTable>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn external_keys(github_id: &Option<String>, google_id: &Option<String>) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(id) = github_id {
        keys.push(format!("github:{id}"));
    }
    if let Some(id) = google_id {
        keys.push(format!("google:{id}"));
    }
    keys
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        if user.password_hash.is_empty() {
            return Err(AuthError::validation("password hash must not be empty"));
        }

        let mut table = self.table.lock();

        if table.by_email.contains_key(&user.email) {
            return Err(AuthError::conflict("email is already registered"));
        }
        if table.by_login.contains_key(&user.login) {
            return Err(AuthError::conflict("login is already taken"));
        }
        let external = external_keys(&user.github_id, &user.google_id);
        if external.iter().any(|k| table.by_external.contains_key(k)) {
            return Err(AuthError::conflict("external identity is already linked"));
        }

        table.next_id += 1;
        let id = table.next_id;
        let now = Utc::now();
        let created = User {
            id,
            email: user.email,
            login: user.login,
            password_hash: user.password_hash,
            email_verified: false,
            github_id: user.github_id,
            google_id: user.google_id,
            created_at: now,
            updated_at: now,
        };

        table.by_email.insert(created.email.clone(), id);
        table.by_login.insert(created.login.clone(), id);
        for key in external {
            table.by_external.insert(key, id);
        }
        table.users.insert(id, created.clone());

        Ok(created)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, AuthError> {
        let table = self.table.lock();
        table
            .by_email
            .get(email)
            .and_then(|id| table.users.get(id))
            .cloned()
            .ok_or(AuthError::NotFound("user"))
    }

    async fn get_by_id(&self, id: UserId) -> Result<User, AuthError> {
        self.table
            .lock()
            .users
            .get(&id)
            .cloned()
            .ok_or(AuthError::NotFound("user"))
    }

    async fn mark_email_verified(&self, id: UserId) -> Result<(), AuthError> {
        let mut table = self.table.lock();
        let user = table.users.get_mut(&id).ok_or(AuthError::NotFound("user"))?;
        if !user.email_verified {
            user.email_verified = true;
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedFlow {
    flow: VerificationFlow,
    evict_at: DateTime<Utc>,
}

/// Expiring flow cache. Entries past their TTL behave as absent even before
/// `purge_expired` physically drops them.
#[derive(Debug, Default)]
pub struct MemoryFlowCache {
    entries: Mutex<HashMap<String, CachedFlow>>,
}

impl MemoryFlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FlowCache for MemoryFlowCache {
    async fn put(&self, flow: VerificationFlow, ttl: Duration) -> Result<(), AuthError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(AuthError::internal)?;
        let evict_at = Utc::now() + ttl;
        self.entries
            .lock()
            .insert(flow.flow_id.clone(), CachedFlow { flow, evict_at });
        Ok(())
    }

    async fn consume(
        &self,
        flow_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<ConsumeOutcome, AuthError> {
        let mut entries = self.entries.lock();

        let entry = match entries.get_mut(flow_id) {
            Some(entry) if entry.evict_at > now => entry,
            _ => return Ok(ConsumeOutcome::Missing),
        };

        let flow = &mut entry.flow;
        let outcome = if flow.consumed {
            ConsumeOutcome::AlreadyConsumed
        } else if flow.failed_attempts >= max_attempts {
            ConsumeOutcome::Locked
        } else if flow.expires_at <= now {
            ConsumeOutcome::Expired
        } else if flow.code_hash != code_hash {
            flow.failed_attempts += 1;
            ConsumeOutcome::Mismatch
        } else {
            flow.consumed = true;
            ConsumeOutcome::Consumed(flow.user_id)
        };

        Ok(outcome)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.evict_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Purged expired verification flows");
        }
        Ok(purged)
    }
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<Uuid, Session>,
    by_token: HashMap<String, Uuid>,
}

impl SessionTable {
    fn insert(&mut self, session: Session) -> Result<(), AuthError> {
        if self.by_token.contains_key(&session.token_hash) || self.sessions.contains_key(&session.id) {
            return Err(AuthError::conflict("session already exists"));
        }
        self.by_token.insert(session.token_hash.clone(), session.id);
        self.sessions.insert(session.id, session);
        Ok(())
    }

    fn revoke_where(&mut self, now: DateTime<Utc>, pred: impl Fn(&Session) -> bool) -> usize {
        let mut revoked = 0;
        for session in self.sessions.values_mut() {
            if session.revoked_at.is_none() && pred(session) {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        revoked
    }
}

/// Session store over a hash map indexed by token digest
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: Mutex<SessionTable>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.table.lock().sessions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), AuthError> {
        self.table.lock().insert(session)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        let table = self.table.lock();
        Ok(table
            .by_token
            .get(token_hash)
            .and_then(|id| table.sessions.get(id))
            .cloned())
    }

    async fn rotate(
        &self,
        current: Uuid,
        next: Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        let mut table = self.table.lock();

        let state = match table.sessions.get(&current) {
            Some(session) => session.state(now),
            None => return Ok(RotateOutcome::Missing),
        };
        if state != SessionState::Live {
            return Ok(RotateOutcome::NotLive(state));
        }

        table.insert(next)?;
        if let Some(session) = table.sessions.get_mut(&current) {
            session.rotated_at = Some(now);
        }
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let mut table = self.table.lock();
        match table.sessions.get_mut(&id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AuthError::NotFound("session")),
        }
    }

    async fn revoke_chain(&self, chain_id: Uuid, now: DateTime<Utc>) -> Result<usize, AuthError> {
        Ok(self
            .table
            .lock()
            .revoke_where(now, |s| s.chain_id == chain_id))
    }

    async fn revoke_all_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize, AuthError> {
        Ok(self
            .table
            .lock()
            .revoke_where(now, |s| s.user_id == user_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut table = self.table.lock();
        let expired: Vec<Uuid> = table
            .sessions
            .values()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.id)
            .collect();

        for id in &expired {
            if let Some(session) = table.sessions.remove(id) {
                table.by_token.remove(&session.token_hash);
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn new_user(email: &str, login: &str) -> NewUser {
        NewUser::new(email.to_string(), login.to_string(), "$argon2id$hash".to_string())
    }

    fn flow(flow_id: &str, expires_at: DateTime<Utc>) -> VerificationFlow {
        VerificationFlow {
            flow_id: flow_id.to_string(),
            user_id: 9,
            code_hash: "good".to_string(),
            expires_at,
            consumed: false,
            failed_attempts: 0,
        }
    }

    fn session(user_id: UserId, token_hash: &str, chain_id: Option<Uuid>) -> Session {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Session {
            id,
            user_id,
            client_id: "web".to_string(),
            token_hash: token_hash.to_string(),
            chain_id: chain_id.unwrap_or(id),
            predecessor_id: None,
            issued_at: now,
            expires_at: now + ChronoDuration::days(30),
            rotated_at: None,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_enforces_uniqueness() {
        let repo = MemoryUserRepository::new();

        let a = repo.create(new_user("a@b.com", "alice")).await.unwrap();
        let b = repo.create(new_user("c@d.com", "carol")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(!a.email_verified);

        let dup_email = repo.create(new_user("a@b.com", "other")).await;
        assert!(matches!(dup_email, Err(AuthError::Conflict(_))));

        let dup_login = repo.create(new_user("x@y.com", "alice")).await;
        assert!(matches!(dup_login, Err(AuthError::Conflict(_))));
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_and_verify_flag() {
        let repo = MemoryUserRepository::new();
        let user = repo.create(new_user("a@b.com", "alice")).await.unwrap();

        assert_eq!(repo.get_by_email("a@b.com").await.unwrap().id, user.id);
        assert!(repo.get_by_email("zz@b.com").await.unwrap_err().is_not_found());
        assert!(repo.get_by_id(999).await.unwrap_err().is_not_found());

        repo.mark_email_verified(user.id).await.unwrap();
        let first = repo.get_by_id(user.id).await.unwrap();
        assert!(first.email_verified);

        repo.mark_email_verified(user.id).await.unwrap();
        let second = repo.get_by_id(user.id).await.unwrap();
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_registration() {
        let repo = Arc::new(MemoryUserRepository::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.create(new_user("race@b.com", &format!("racer{i}"))).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthError::Conflict(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_flow_consume_outcomes() {
        let cache = MemoryFlowCache::new();
        let now = Utc::now();
        let ttl = Duration::from_secs(3600);

        cache.put(flow("f1", now + ChronoDuration::minutes(15)), ttl).await.unwrap();
        assert_eq!(cache.consume("nope", "good", now, 5).await.unwrap(), ConsumeOutcome::Missing);
        assert_eq!(cache.consume("f1", "bad", now, 5).await.unwrap(), ConsumeOutcome::Mismatch);
        assert_eq!(cache.consume("f1", "good", now, 5).await.unwrap(), ConsumeOutcome::Consumed(9));
        assert_eq!(
            cache.consume("f1", "good", now, 5).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed
        );

        cache.put(flow("f2", now - ChronoDuration::minutes(1)), ttl).await.unwrap();
        assert_eq!(cache.consume("f2", "good", now, 5).await.unwrap(), ConsumeOutcome::Expired);
    }

    #[tokio::test]
    async fn test_flow_locks_after_max_attempts() {
        let cache = MemoryFlowCache::new();
        let now = Utc::now();
        cache
            .put(flow("f1", now + ChronoDuration::minutes(15)), Duration::from_secs(3600))
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(cache.consume("f1", "bad", now, 3).await.unwrap(), ConsumeOutcome::Mismatch);
        }
        assert_eq!(cache.consume("f1", "good", now, 3).await.unwrap(), ConsumeOutcome::Locked);
    }

    #[tokio::test]
    async fn test_flow_ttl_eviction() {
        let cache = MemoryFlowCache::new();
        let now = Utc::now();
        cache
            .put(flow("f1", now + ChronoDuration::minutes(15)), Duration::from_secs(60))
            .await
            .unwrap();

        let later = now + ChronoDuration::minutes(5);
        assert_eq!(cache.consume("f1", "good", later, 5).await.unwrap(), ConsumeOutcome::Missing);
        assert_eq!(cache.purge_expired(later).await.unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rotate_is_single_winner() {
        let store = MemorySessionStore::new();
        let root = session(1, "t0", None);
        store.insert(root.clone()).await.unwrap();
        let now = Utc::now();

        let next = session(1, "t1", Some(root.id));
        assert_eq!(store.rotate(root.id, next, now).await.unwrap(), RotateOutcome::Rotated);

        let loser = session(1, "t1b", Some(root.id));
        assert_eq!(
            store.rotate(root.id, loser, now).await.unwrap(),
            RotateOutcome::NotLive(SessionState::Rotated)
        );
        assert!(store.find_by_token_hash("t1b").await.unwrap().is_none());
        assert_eq!(
            store.rotate(Uuid::new_v4(), session(1, "t2", None), now).await.unwrap(),
            RotateOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_revocation_scopes() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let a = session(1, "a", None);
        let a2 = session(1, "a2", Some(a.chain_id));
        let b = session(1, "b", None);
        let other = session(2, "o", None);
        for s in [&a, &a2, &b, &other] {
            store.insert(s.clone()).await.unwrap();
        }

        assert_eq!(store.revoke_chain(a.chain_id, now).await.unwrap(), 2);
        assert!(store.get(b.id).unwrap().revoked_at.is_none());

        assert!(store.revoke(b.id, now).await.unwrap());
        assert!(!store.revoke(b.id, now).await.unwrap());
        assert!(store.revoke(Uuid::new_v4(), now).await.unwrap_err().is_not_found());

        assert_eq!(store.revoke_all_for_user(2, now).await.unwrap(), 1);
        assert_eq!(store.revoke_all_for_user(1, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired_sessions() {
        let store = MemorySessionStore::new();
        let s = session(1, "old", None);
        store.insert(s.clone()).await.unwrap();

        let far_future = Utc::now() + ChronoDuration::days(31);
        assert_eq!(store.purge_expired(far_future).await.unwrap(), 1);
        assert!(store.find_by_token_hash("old").await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
