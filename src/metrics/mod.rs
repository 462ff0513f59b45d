//! Metrics Module
//!
//! Prometheus counters for registrations, logins, verifications, refreshes
//! and revocations, plus per-call latency.

pub mod collector;

pub use collector::{AuthMetrics, OUTCOME_OK};
