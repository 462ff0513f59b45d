//! SQLite Store
//!
//! Relational backend for users, sessions and verification flows. Every call
//! opens its own connection on the blocking pool; uniqueness comes from
//! table constraints and conditional transitions are single guarded
//! statements or `IMMEDIATE` transactions. Dropping the calling future
//! interrupts the statement in flight.

use super::{ConsumeOutcome, FlowCache, RotateOutcome, SessionStore, UserRepository};
use crate::auth::{AuthError, NewUser, Session, User, UserId, VerificationFlow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    params, Connection, ErrorCode, InterruptHandle, OptionalExtension, Row, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        login TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL CHECK (length(password_hash) > 0),
        email_verified INTEGER NOT NULL DEFAULT 0,
        github_id TEXT UNIQUE,
        google_id TEXT UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        client_id TEXT NOT NULL,
        token_hash TEXT NOT NULL UNIQUE,
        chain_id TEXT NOT NULL,
        predecessor_id TEXT,
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        rotated_at INTEGER,
        revoked_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_chain ON sessions (chain_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id);

    CREATE TABLE IF NOT EXISTS verification_flows (
        flow_id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        code_hash TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        evict_at INTEGER NOT NULL,
        consumed INTEGER NOT NULL DEFAULT 0,
        failed_attempts INTEGER NOT NULL DEFAULT 0
    );
";

const USER_COLUMNS: &str = "id, email, login, password_hash, email_verified, github_id, google_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, client_id, token_hash, chain_id, predecessor_id, issued_at, expires_at, rotated_at, revoked_at";

/// Shared handle to one SQLite database file; cheap to clone
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    busy_timeout: Duration,
}

trait DbResultExt<T> {
    fn db(self, op: &'static str) -> Result<T, AuthError>;
}

impl<T> DbResultExt<T> for Result<T, rusqlite::Error> {
    fn db(self, op: &'static str) -> Result<T, AuthError> {
        self.map_err(|e| AuthError::internal(anyhow::Error::new(e).context(op)))
    }
}

/// Interrupts the connection unless disarmed, so an abandoned call stops
/// its statement instead of running to completion unobserved
struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            debug!("Interrupting abandoned database call");
            handle.interrupt();
        }
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn parse_uuid(idx: usize, raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        login: row.get(2)?,
        password_hash: row.get(3)?,
        email_verified: row.get(4)?,
        github_id: row.get(5)?,
        google_id: row.get(6)?,
        created_at: from_millis(row.get(7)?)?,
        updated_at: from_millis(row.get(8)?)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let predecessor: Option<String> = row.get(5)?;
    let rotated_at: Option<i64> = row.get(8)?;
    let revoked_at: Option<i64> = row.get(9)?;

    Ok(Session {
        id: parse_uuid(0, row.get(0)?)?,
        user_id: row.get(1)?,
        client_id: row.get(2)?,
        token_hash: row.get(3)?,
        chain_id: parse_uuid(4, row.get(4)?)?,
        predecessor_id: predecessor.map(|p| parse_uuid(5, p)).transpose()?,
        issued_at: from_millis(row.get(6)?)?,
        expires_at: from_millis(row.get(7)?)?,
        rotated_at: rotated_at.map(from_millis).transpose()?,
        revoked_at: revoked_at.map(from_millis).transpose()?,
    })
}

/// Maps a unique-constraint failure to `Conflict`, naming the column
fn conflict_or_internal(err: rusqlite::Error, op: &'static str) -> AuthError {
    if let rusqlite::Error::SqliteFailure(code, Some(message)) = &err {
        if code.code == ErrorCode::ConstraintViolation && message.contains("UNIQUE") {
            let what = if message.contains(".email") {
                "email is already registered"
            } else if message.contains(".login") {
                "login is already taken"
            } else if message.contains("_id") {
                "external identity is already linked"
            } else {
                "record already exists"
            };
            return AuthError::conflict(what);
        }
    }
    AuthError::internal(anyhow::Error::new(err).context(op))
}

fn insert_session(conn: &Connection, s: &Session) -> Result<(), AuthError> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, client_id, token_hash, chain_id, predecessor_id,
                               issued_at, expires_at, rotated_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            s.id.to_string(),
            s.user_id,
            s.client_id,
            s.token_hash,
            s.chain_id.to_string(),
            s.predecessor_id.map(|p| p.to_string()),
            to_millis(s.issued_at),
            to_millis(s.expires_at),
            s.rotated_at.map(to_millis),
            s.revoked_at.map(to_millis),
        ],
    )
    .map_err(|e| conflict_or_internal(e, "insert session"))?;
    Ok(())
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply the schema
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, AuthError> {
        let store = Self {
            inner: Arc::new(StoreInner {
                path: path.as_ref().to_path_buf(),
                busy_timeout,
            }),
        };

        store
            .run("apply schema", |conn| {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })
                .db("enable WAL")?;
                conn.execute_batch(SCHEMA).db("create tables")?;
                Ok(())
            })
            .await?;

        info!(path = %store.inner.path.display(), "SQLite store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn connect(path: &Path, busy_timeout: Duration) -> Result<Connection, AuthError> {
        let conn = Connection::open(path).db("open database")?;
        conn.busy_timeout(busy_timeout).db("set busy timeout")?;
        Ok(conn)
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AuthError> + Send + 'static,
    {
        let path = self.inner.path.clone();
        let busy_timeout = self.inner.busy_timeout;
        let (handle_tx, handle_rx) = oneshot::channel();

        let task = tokio::task::spawn_blocking(move || {
            let mut conn = Self::connect(&path, busy_timeout)?;
            let _ = handle_tx.send(conn.get_interrupt_handle());
            f(&mut conn)
        });

        let guard = InterruptOnDrop(handle_rx.await.ok());
        let result = task.await;
        guard.disarm();

        let result = result?;
        if let Err(AuthError::Internal(e)) = &result {
            debug!(op, error = %e, "Database operation failed");
        }
        result
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn create(&self, user: NewUser) -> Result<User, AuthError> {
        self.run("create user", move |conn| {
            let now = to_millis(Utc::now());
            let sql = format!(
                "INSERT INTO users (email, login, password_hash, email_verified, github_id, google_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?6)
                 RETURNING {USER_COLUMNS}"
            );
            conn.query_row(
                &sql,
                params![user.email, user.login, user.password_hash, user.github_id, user.google_id, now],
                user_from_row,
            )
            .map_err(|e| conflict_or_internal(e, "insert user"))
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User, AuthError> {
        let email = email.to_string();
        self.run("get user by email", move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 LIMIT 1");
            conn.query_row(&sql, params![email], user_from_row)
                .optional()
                .db("select user by email")?
                .ok_or(AuthError::NotFound("user"))
        })
        .await
    }

    async fn get_by_id(&self, id: UserId) -> Result<User, AuthError> {
        self.run("get user by id", move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            conn.query_row(&sql, params![id], user_from_row)
                .optional()
                .db("select user by id")?
                .ok_or(AuthError::NotFound("user"))
        })
        .await
    }

    async fn mark_email_verified(&self, id: UserId) -> Result<(), AuthError> {
        self.run("mark email verified", move |conn| {
            let flipped = conn
                .execute(
                    "UPDATE users SET email_verified = 1, updated_at = ?2
                     WHERE id = ?1 AND email_verified = 0",
                    params![id, to_millis(Utc::now())],
                )
                .db("update email_verified")?;
            if flipped == 1 {
                return Ok(());
            }

            let exists: Option<i64> = conn
                .query_row("SELECT id FROM users WHERE id = ?1", params![id], |row| row.get(0))
                .optional()
                .db("check user exists")?;
            exists.map(|_| ()).ok_or(AuthError::NotFound("user"))
        })
        .await
    }
}

#[async_trait]
impl FlowCache for SqliteStore {
    async fn put(&self, flow: VerificationFlow, ttl: Duration) -> Result<(), AuthError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(AuthError::internal)?;
        self.run("put verification flow", move |conn| {
            let evict_at = Utc::now() + ttl;
            conn.execute(
                "INSERT OR REPLACE INTO verification_flows
                     (flow_id, user_id, code_hash, expires_at, evict_at, consumed, failed_attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    flow.flow_id,
                    flow.user_id,
                    flow.code_hash,
                    to_millis(flow.expires_at),
                    to_millis(evict_at),
                    flow.consumed,
                    flow.failed_attempts,
                ],
            )
            .db("insert verification flow")?;
            Ok(())
        })
        .await
    }

    async fn consume(
        &self,
        flow_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<ConsumeOutcome, AuthError> {
        let flow_id = flow_id.to_string();
        let code_hash = code_hash.to_string();
        self.run("consume verification flow", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .db("begin consume")?;
            let now_ms = to_millis(now);

            let record = tx
                .query_row(
                    "SELECT user_id, code_hash, expires_at, consumed, failed_attempts
                     FROM verification_flows WHERE flow_id = ?1 AND evict_at > ?2",
                    params![flow_id, now_ms],
                    |row| {
                        Ok((
                            row.get::<_, UserId>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, u32>(4)?,
                        ))
                    },
                )
                .optional()
                .db("select verification flow")?;

            let Some((user_id, stored_hash, expires_at, consumed, failed_attempts)) = record else {
                return Ok(ConsumeOutcome::Missing);
            };

            let outcome = if consumed {
                ConsumeOutcome::AlreadyConsumed
            } else if failed_attempts >= max_attempts {
                ConsumeOutcome::Locked
            } else if expires_at <= now_ms {
                ConsumeOutcome::Expired
            } else if stored_hash != code_hash {
                tx.execute(
                    "UPDATE verification_flows SET failed_attempts = failed_attempts + 1 WHERE flow_id = ?1",
                    params![flow_id],
                )
                .db("count failed attempt")?;
                ConsumeOutcome::Mismatch
            } else {
                tx.execute(
                    "UPDATE verification_flows SET consumed = 1 WHERE flow_id = ?1 AND consumed = 0",
                    params![flow_id],
                )
                .db("mark flow consumed")?;
                ConsumeOutcome::Consumed(user_id)
            };

            tx.commit().db("commit consume")?;
            Ok(outcome)
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        self.run("purge verification flows", move |conn| {
            conn.execute(
                "DELETE FROM verification_flows WHERE evict_at <= ?1",
                params![to_millis(now)],
            )
            .db("delete evicted flows")
        })
        .await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, session: Session) -> Result<(), AuthError> {
        self.run("insert session", move |conn| insert_session(conn, &session))
            .await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, AuthError> {
        let token_hash = token_hash.to_string();
        self.run("find session", move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = ?1");
            conn.query_row(&sql, params![token_hash], session_from_row)
                .optional()
                .db("select session by token")
        })
        .await
    }

    async fn rotate(
        &self,
        current: Uuid,
        next: Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        self.run("rotate session", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .db("begin rotate")?;
            let now_ms = to_millis(now);

            let won = tx
                .execute(
                    "UPDATE sessions SET rotated_at = ?2
                     WHERE id = ?1 AND rotated_at IS NULL AND revoked_at IS NULL AND expires_at > ?2",
                    params![current.to_string(), now_ms],
                )
                .db("conditional rotate")?;

            if won == 0 {
                let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
                let observed = tx
                    .query_row(&sql, params![current.to_string()], session_from_row)
                    .optional()
                    .db("reload session")?;
                return Ok(match observed {
                    Some(session) => RotateOutcome::NotLive(session.state(now)),
                    None => RotateOutcome::Missing,
                });
            }

            insert_session(&tx, &next)?;
            tx.commit().db("commit rotate")?;
            Ok(RotateOutcome::Rotated)
        })
        .await
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        self.run("revoke session", move |conn| {
            let revoked = conn
                .execute(
                    "UPDATE sessions SET revoked_at = ?2 WHERE id = ?1 AND revoked_at IS NULL",
                    params![id.to_string(), to_millis(now)],
                )
                .db("revoke session")?;
            if revoked == 1 {
                return Ok(true);
            }

            let exists: Option<String> = conn
                .query_row("SELECT id FROM sessions WHERE id = ?1", params![id.to_string()], |row| {
                    row.get(0)
                })
                .optional()
                .db("check session exists")?;
            exists.map(|_| false).ok_or(AuthError::NotFound("session"))
        })
        .await
    }

    async fn revoke_chain(&self, chain_id: Uuid, now: DateTime<Utc>) -> Result<usize, AuthError> {
        self.run("revoke chain", move |conn| {
            conn.execute(
                "UPDATE sessions SET revoked_at = ?2 WHERE chain_id = ?1 AND revoked_at IS NULL",
                params![chain_id.to_string(), to_millis(now)],
            )
            .db("revoke chain")
        })
        .await
    }

    async fn revoke_all_for_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize, AuthError> {
        self.run("revoke user sessions", move |conn| {
            conn.execute(
                "UPDATE sessions SET revoked_at = ?2 WHERE user_id = ?1 AND revoked_at IS NULL",
                params![user_id, to_millis(now)],
            )
            .db("revoke user sessions")
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        self.run("purge sessions", move |conn| {
            conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![to_millis(now)],
            )
            .db("delete expired sessions")
        })
        .await
    }
}
