//! Authentication flow over the SQLite backend

use authgate::auth::{
    crypto, AccessTokenSigner, AuthError, AuthService, ChannelNotifier, TokenManager,
    VerificationNotice,
};
use authgate::config::{Config, HashingConfig, TokenConfig};
use authgate::metrics::AuthMetrics;
use authgate::storage::{SessionStore, SqliteStore, Stores, UserRepository};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const SIGNING_KEY: &[u8] = b"integration-test-signing-key-0123456789";

async fn open(path: &Path) -> Stores {
    let store = SqliteStore::open(path, Duration::from_secs(5)).await.unwrap();
    Stores::sqlite(store)
}

fn build(stores: Stores) -> (Arc<AuthService>, UnboundedReceiver<VerificationNotice>) {
    let config = Config {
        hashing: HashingConfig::fast_for_tests(),
        ..Default::default()
    };
    let (notifier, codes) = ChannelNotifier::new();
    let metrics = Arc::new(AuthMetrics::new().unwrap());
    let service =
        AuthService::build(&config, SIGNING_KEY, stores, Arc::new(notifier), metrics).unwrap();
    (Arc::new(service), codes)
}

#[tokio::test]
async fn test_full_flow_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let stores = open(&dir.path().join("auth.db")).await;
    let users = stores.users.clone();
    let (service, mut codes) = build(stores);

    let user = service
        .register("a@b.com", "alice", "Secret123!")
        .await
        .unwrap();
    let stored = users.get_by_email("a@b.com").await.unwrap();
    assert_eq!(stored.id, user.id);
    assert_ne!(stored.password_hash, "Secret123!");
    assert!(stored.password_hash.starts_with("$argon2id$"));

    assert!(matches!(
        service.login("a@b.com", "Secret123!", "web").await,
        Err(AuthError::Authentication("email not verified"))
    ));

    let notice = codes.recv().await.unwrap();
    service
        .verify_email(&notice.flow_id, &notice.code)
        .await
        .unwrap();
    assert!(matches!(
        service.verify_email(&notice.flow_id, &notice.code).await,
        Err(AuthError::AlreadyConsumed)
    ));

    let t0 = service
        .login("a@b.com", "Secret123!", "web")
        .await
        .unwrap()
        .tokens;
    let t1 = service.refresh_token(&t0.refresh_token, "web").await.unwrap();
    assert!(matches!(
        service.refresh_token(&t0.refresh_token, "web").await,
        Err(AuthError::ReusedToken)
    ));
    assert!(matches!(
        service.refresh_token(&t1.refresh_token, "web").await,
        Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_registration_race_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let (service, _codes) = build(open(&dir.path().join("auth.db")).await);

    let mut handles = Vec::new();
    for i in 0..6 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .register("race@b.com", &format!("racer{i}"), "Secret123!")
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(err, AuthError::Conflict(_)), "{err:?}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_race_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let (service, mut codes) = build(open(&dir.path().join("auth.db")).await);

    service
        .register("a@b.com", "alice", "Secret123!")
        .await
        .unwrap();
    let notice = codes.recv().await.unwrap();
    service
        .verify_email(&notice.flow_id, &notice.code)
        .await
        .unwrap();
    let t0 = service
        .login("a@b.com", "Secret123!", "web")
        .await
        .unwrap()
        .tokens;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        let token = t0.refresh_token.clone();
        handles.push(tokio::spawn(async move {
            service.refresh_token(&token, "web").await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(matches!(err, AuthError::ReusedToken), "{err:?}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth.db");

    let refresh_token = {
        let (service, mut codes) = build(open(&path).await);
        service
            .register("a@b.com", "alice", "Secret123!")
            .await
            .unwrap();
        let notice = codes.recv().await.unwrap();
        service
            .verify_email(&notice.flow_id, &notice.code)
            .await
            .unwrap();
        service
            .login("a@b.com", "Secret123!", "web")
            .await
            .unwrap()
            .tokens
            .refresh_token
    };

    let (service, _codes) = build(open(&path).await);
    assert!(matches!(
        service.register("a@b.com", "alice2", "Secret123!").await,
        Err(AuthError::Conflict(_))
    ));
    service.refresh_token(&refresh_token, "web").await.unwrap();
}

#[tokio::test]
async fn test_reuse_revocation_outlives_caller_deadline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth.db");
    let store = SqliteStore::open(&path, Duration::from_secs(5)).await.unwrap();

    let config = TokenConfig::default();
    let signer = AccessTokenSigner::new(SIGNING_KEY, &config).unwrap();
    let metrics = Arc::new(AuthMetrics::new().unwrap());
    let tokens = TokenManager::new(Arc::new(store.clone()), signer, &config, metrics).unwrap();

    let t0 = tokens.issue_tokens(1, "web").await.unwrap();
    let t1 = tokens.refresh(&t0.refresh_token, "web").await.unwrap();

    // another writer holds the database while the reuse is detected
    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let reuse = tokio::time::timeout(
        Duration::from_millis(100),
        tokens.refresh(&t0.refresh_token, "web"),
    )
    .await;
    assert!(reuse.is_err(), "call should have hit its deadline");

    blocker.execute_batch("COMMIT").unwrap();
    drop(blocker);

    let leaf_hash = crypto::digest(&t1.refresh_token);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let leaf = store.find_by_token_hash(&leaf_hash).await.unwrap().unwrap();
        if leaf.revoked_at.is_some() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "chain was never revoked"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(matches!(
        tokens.refresh(&t1.refresh_token, "web").await,
        Err(AuthError::TokenRevoked)
    ));
}
