//! Configuration Manager

use super::{Config, StorageBackend};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Signing keys shorter than this are rejected for HS256
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let mut config = if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            Config::default()
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate().context("Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Load configuration from defaults plus environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut Config) -> Result<()> {
        if let Ok(bind_addr) = std::env::var("AUTHGATE_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid AUTHGATE_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(timeout) = std::env::var("AUTHGATE_REQUEST_TIMEOUT") {
            config.server.request_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid AUTHGATE_REQUEST_TIMEOUT: {}", timeout))?;
        }

        if let Ok(backend) = std::env::var("AUTHGATE_STORAGE_BACKEND") {
            config.storage.backend = match backend.as_str() {
                "sqlite" => StorageBackend::Sqlite,
                "memory" => StorageBackend::Memory,
                other => bail!("Invalid AUTHGATE_STORAGE_BACKEND: {}", other),
            };
        }

        if let Ok(path) = std::env::var("AUTHGATE_DATABASE_PATH") {
            config.storage.database_path = PathBuf::from(path);
        }

        if let Ok(log_level) = std::env::var("AUTHGATE_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        if let Ok(api_key) = std::env::var("AUTHGATE_ADMIN_API_KEY") {
            config.admin.api_key = Some(api_key);
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;

        self.validate_verification_config()
            .context("Verification configuration validation failed")?;

        self.validate_token_config()
            .context("Token configuration validation failed")?;

        self.validate_hashing_config()
            .context("Hashing configuration validation failed")?;

        self.validate_monitoring_config()
            .context("Monitoring configuration validation failed")?;

        if self.admin.enabled && self.admin.api_key.as_deref().map_or(true, str::is_empty) {
            bail!("admin.enabled requires admin.api_key (or AUTHGATE_ADMIN_API_KEY)");
        }

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.server.request_timeout.as_secs() > 300 {
            bail!("request_timeout cannot exceed 5 minutes");
        }

        if self.server.cleanup_interval.as_secs() == 0 {
            bail!("cleanup_interval must be at least 1s");
        }

        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.database_path.as_os_str().is_empty()
        {
            bail!("storage.database_path must be set for the sqlite backend");
        }

        Ok(())
    }

    fn validate_verification_config(&self) -> Result<()> {
        let v = &self.verification;
        if v.code_ttl.is_zero() {
            bail!("code_ttl must be greater than 0");
        }

        if !(4..=12).contains(&v.code_length) {
            bail!("code_length must be between 4 and 12");
        }

        if v.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }

        Ok(())
    }

    fn validate_token_config(&self) -> Result<()> {
        let t = &self.tokens;
        if t.issuer.is_empty() {
            bail!("tokens.issuer must not be empty");
        }

        if t.access_token_ttl.is_zero() || t.refresh_token_ttl.is_zero() {
            bail!("token lifetimes must be greater than 0");
        }

        if t.access_token_ttl >= t.refresh_token_ttl {
            bail!("access_token_ttl must be shorter than refresh_token_ttl");
        }

        Ok(())
    }

    fn validate_hashing_config(&self) -> Result<()> {
        let h = &self.hashing;
        if h.iterations == 0 || h.parallelism == 0 {
            bail!("hashing.iterations and hashing.parallelism must be at least 1");
        }

        if h.memory_kib < 8 * h.parallelism {
            bail!("hashing.memory_kib must be at least 8 * parallelism");
        }

        if self.password_policy.min_length == 0
            || self.password_policy.min_length > self.password_policy.max_length
        {
            bail!("password_policy.min_length must be in 1..=max_length");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Signing key from inline config, else from the configured env var
    pub fn resolve_signing_key(&self) -> Result<Vec<u8>> {
        let key = match &self.tokens.signing_key {
            Some(key) => key.clone(),
            None => std::env::var(&self.tokens.signing_key_env).with_context(|| {
                format!("Signing key not configured: set {}", self.tokens.signing_key_env)
            })?,
        };

        if key.len() < MIN_SIGNING_KEY_LEN {
            bail!("Signing key must be at least {} bytes", MIN_SIGNING_KEY_LEN);
        }

        Ok(key.into_bytes())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        database: Option<&Path>,
        memory: bool,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(path) = database {
            self.storage.database_path = path.to_path_buf();
            tracing::info!("CLI override: database path set to {}", path.display());
        }

        if memory {
            self.storage.backend = StorageBackend::Memory;
            tracing::info!("CLI override: using in-memory storage");
        }
    }
}
