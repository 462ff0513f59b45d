//! Verification code delivery
//!
//! Delivery is fire-and-forget: a failing notifier is logged and never fails
//! the operation that issued the code.

use super::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Message carrying a fresh verification code to its owner
#[derive(Debug, Clone)]
pub struct VerificationNotice {
    pub user_id: UserId,
    pub email: String,
    pub flow_id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, notice: VerificationNotice) -> anyhow::Result<()>;
}

/// Spawn delivery and return immediately
pub fn dispatch(notifier: Arc<dyn Notifier>, notice: VerificationNotice) {
    tokio::spawn(async move {
        let user_id = notice.user_id;
        if let Err(e) = notifier.send_verification(notice).await {
            warn!(user_id = %user_id, error = %e, "Failed to deliver verification code");
        }
    });
}

/// Records that a code would be sent. Stand-in until a mail gateway is wired.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification(&self, notice: VerificationNotice) -> anyhow::Result<()> {
        info!(
            user_id = %notice.user_id,
            email = %notice.email,
            flow_id = %notice.flow_id,
            expires_at = %notice.expires_at,
            "Verification code ready for delivery"
        );
        Ok(())
    }
}

/// Hands notices to an in-process receiver
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<VerificationNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VerificationNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send_verification(&self, notice: VerificationNotice) -> anyhow::Result<()> {
        self.tx
            .send(notice)
            .map_err(|_| anyhow::anyhow!("notification receiver closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> VerificationNotice {
        VerificationNotice {
            user_id: 1,
            email: "a@b.com".to_string(),
            flow_id: "flow".to_string(),
            code: "123456".to_string(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        dispatch(Arc::new(notifier), notice());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.code, "123456");
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        assert!(notifier.send_verification(notice()).await.is_err());
        // dispatch swallows it
        dispatch(Arc::new(notifier), notice());
        LogNotifier.send_verification(notice()).await.unwrap();
    }
}
