//! Configuration Module
//!
//! Handles configuration loading, validation, and management.

pub mod manager;
pub mod types;

pub use manager::{ConfigManager, MIN_SIGNING_KEY_LEN};
pub use types::*;
