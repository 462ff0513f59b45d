//! Periodic removal of expired flows and sessions

use super::Stores;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sweep every `interval` until a shutdown signal arrives
pub fn spawn_sweeper(
    stores: Stores,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Expiry sweeper started (interval: {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match stores.purge_expired(Utc::now()).await {
                        Ok((flows, sessions)) if flows + sessions > 0 => {
                            info!(flows, sessions, "Purged expired records");
                        }
                        Ok(_) => debug!("Nothing to purge"),
                        Err(e) => warn!(error = ?e, "Expiry sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Expiry sweeper stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Session, VerificationFlow};
    use crate::storage::{
        FlowCache, MemoryFlowCache, MemorySessionStore, MemoryUserRepository, SessionStore,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let flows = Arc::new(MemoryFlowCache::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let stores = Stores {
            users: Arc::new(MemoryUserRepository::new()),
            flows: flows.clone(),
            sessions: sessions.clone(),
        };

        let now = Utc::now();
        flows
            .put(
                VerificationFlow {
                    flow_id: "f".to_string(),
                    user_id: 1,
                    code_hash: "h".to_string(),
                    expires_at: now,
                    consumed: false,
                    failed_attempts: 0,
                },
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        let id = Uuid::new_v4();
        sessions
            .insert(Session {
                id,
                user_id: 1,
                client_id: "web".to_string(),
                token_hash: "t".to_string(),
                chain_id: id,
                predecessor_id: None,
                issued_at: now,
                expires_at: now,
                rotated_at: None,
                revoked_at: None,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(stores, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(flows.is_empty());
        assert!(sessions.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
