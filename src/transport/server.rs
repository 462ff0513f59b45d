//! Remote-call Server

use super::{api::AuthApi, handlers::AppState};
use crate::config::AdminConfig;
use crate::Result;
use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

pub struct AuthServer {
    bind_addr: SocketAddr,
    router: Router,
}

impl AuthServer {
    pub fn new(bind_addr: SocketAddr, state: AppState, admin: &AdminConfig) -> Self {
        Self {
            bind_addr,
            router: AuthApi::create_router(state, admin),
        }
    }

    /// Serve until a shutdown signal arrives, then drain in-flight calls
    pub async fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("Starting authgate server on {}", self.bind_addr);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind server to {}", self.bind_addr))?;

        info!("authgate listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Server no longer accepting calls");
            })
            .await
            .context("Server error")?;

        Ok(())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
