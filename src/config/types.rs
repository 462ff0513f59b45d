//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub verification: VerificationConfig,
    pub tokens: TokenConfig,
    pub hashing: HashingConfig,
    pub password_policy: PasswordPolicy,
    pub monitoring: MonitoringConfig,
    pub admin: AdminConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Deadline applied to every remote call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// How often expired flows and sessions are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

/// Which backend holds users, sessions and flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Email verification flow policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerificationConfig {
    #[serde(with = "humantime_serde")]
    pub code_ttl: Duration,
    pub code_length: usize,
    pub max_attempts: u32,
    /// How long a flow stays addressable after it stops being usable, so
    /// late attempts get `Expired`/`AlreadyConsumed` instead of `InvalidCode`
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

/// Access/refresh token policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    pub issuer: String,
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
    /// Inline signing key; prefer `signing_key_env` outside development
    #[serde(default, skip_serializing)]
    pub signing_key: Option<String>,
    pub signing_key_env: String,
}

/// Argon2id work factor
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Password acceptance rules applied at registration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

/// Admin surface configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl HashingConfig {
    /// Minimal work factor so test suites stay fast
    pub fn fast_for_tests() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: PathBuf::from("authgate.db"),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(15 * 60),
            code_length: 6,
            max_attempts: 5,
            retention: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "authgate".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            signing_key: None,
            signing_key_env: "AUTHGATE_SIGNING_KEY".to_string(),
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        // OWASP Argon2id baseline: 19 MiB, 2 passes, 1 lane
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
