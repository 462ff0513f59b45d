//! authgate
//!
//! Identity boundary service: account records, credential verification,
//! email verification and the access/refresh token lifecycle, served over a
//! JSON remote-call surface.

pub mod auth;
pub mod config;
pub mod metrics;
pub mod security;
pub mod shutdown;
pub mod storage;
pub mod transport;

pub use auth::{AuthError, AuthService};
pub use config::Config;
pub use shutdown::ShutdownCoordinator;

/// Error type for bootstrap and process wiring
pub type Result<T> = anyhow::Result<T>;
