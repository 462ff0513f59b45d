//! authgate - identity boundary service

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authgate::{
    auth::LogNotifier,
    config::{Config, ConfigManager},
    metrics::AuthMetrics,
    storage::{spawn_sweeper, Stores},
    transport::{AppState, AuthServer},
    AuthService, ShutdownCoordinator,
};

/// CLI arguments for authgate
#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(about = "authgate - accounts, credentials and session tokens")]
#[command(version)]
#[command(long_about = "
authgate - identity boundary service

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  AUTHGATE_BIND_ADDR        - Bind address (e.g., 127.0.0.1:50051)
  AUTHGATE_REQUEST_TIMEOUT  - Per-call deadline (e.g., 10s)
  AUTHGATE_STORAGE_BACKEND  - sqlite or memory
  AUTHGATE_DATABASE_PATH    - SQLite database file
  AUTHGATE_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
  AUTHGATE_ADMIN_API_KEY    - Key for the admin routes
  AUTHGATE_SIGNING_KEY      - Access token signing key (at least 32 bytes)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "authgate.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:50051)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// SQLite database path (overrides config file)
    #[arg(long, help = "SQLite database path")]
    pub database: Option<PathBuf>,

    /// Keep everything in process memory
    #[arg(long, help = "Use in-memory storage")]
    pub memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.database.as_deref(),
        args.memory,
    );

    init_tracing(&args, &config)?;

    info!("Starting authgate v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .context("Final configuration validation failed")?;
    let signing_key = config.resolve_signing_key()?;

    if args.validate_config {
        info!("Configuration is valid");
        log_summary(&config);
        return Ok(());
    }
    log_summary(&config);

    let metrics = Arc::new(AuthMetrics::new().context("Failed to create metrics")?);
    let stores = Stores::open(&config.storage)
        .await
        .context("Failed to open storage")?;
    let service = Arc::new(
        AuthService::build(
            &config,
            &signing_key,
            stores.clone(),
            Arc::new(LogNotifier),
            metrics,
        )
        .context("Failed to build authentication service")?,
    );

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    let sweeper = spawn_sweeper(
        stores,
        config.server.cleanup_interval,
        shutdown_coordinator.subscribe(),
    );

    let state = AppState::new(
        service,
        config.server.request_timeout,
        config.monitoring.metrics_enabled,
    );
    let server = AuthServer::new(config.server.bind_addr, state, &config.admin);
    let server_rx = shutdown_coordinator.subscribe();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.start(server_rx).await {
            error!("Server error: {:#}", e);
        }
    });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    let server_exited = tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
            false
        }
        _ = &mut server_handle => {
            warn!("Server stopped unexpectedly");
            true
        }
    };

    info!("Initiating graceful shutdown...");
    shutdown_coordinator.trigger();

    let mut tasks = vec![("sweeper", sweeper)];
    if !server_exited {
        tasks.insert(0, ("server", server_handle));
    }
    shutdown_coordinator.drain(tasks).await;

    if server_exited {
        anyhow::bail!("server exited before shutdown was requested");
    }
    Ok(())
}

fn log_summary(config: &Config) {
    info!("  Bind address: {}", config.server.bind_addr);
    info!("  Request timeout: {:?}", config.server.request_timeout);
    info!("  Storage: {:?} ({})", config.storage.backend, config.storage.database_path.display());
    info!("  Verification code TTL: {:?}", config.verification.code_ttl);
    info!(
        "  Token lifetimes: access {:?}, refresh {:?}",
        config.tokens.access_token_ttl, config.tokens.refresh_token_ttl
    );
    info!(
        "  Admin API: {}",
        if config.admin.enabled { "enabled" } else { "disabled" }
    );
}

/// Initialize tracing/logging. `RUST_LOG` wins, then the CLI, then config.
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level
            .as_deref()
            .unwrap_or(config.monitoring.log_level.as_str())
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
