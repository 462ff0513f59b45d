//! Metrics Collector

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::error;

/// Outcome label for a successful call
pub const OUTCOME_OK: &str = "ok";

/// Prometheus counters for the authentication surface
pub struct AuthMetrics {
    registry: Registry,

    registrations_total: IntCounter,
    logins_total: IntCounterVec,
    verifications_total: IntCounterVec,
    refreshes_total: IntCounterVec,
    token_reuse_total: IntCounter,
    revocations_total: IntCounterVec,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl AuthMetrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let registrations_total = IntCounter::new(
            "authgate_registrations_total",
            "Accounts created",
        )?;

        let logins_total = IntCounterVec::new(
            Opts::new("authgate_logins_total", "Login attempts by outcome"),
            &["outcome"],
        )?;

        let verifications_total = IntCounterVec::new(
            Opts::new("authgate_verifications_total", "Email verification attempts by outcome"),
            &["outcome"],
        )?;

        let refreshes_total = IntCounterVec::new(
            Opts::new("authgate_refreshes_total", "Refresh token rotations by outcome"),
            &["outcome"],
        )?;

        let token_reuse_total = IntCounter::new(
            "authgate_token_reuse_total",
            "Rotated refresh tokens presented again",
        )?;

        let revocations_total = IntCounterVec::new(
            Opts::new("authgate_revoked_sessions_total", "Sessions revoked, by scope"),
            &["scope"],
        )?;

        let requests_total = IntCounterVec::new(
            Opts::new("authgate_requests_total", "Remote calls by operation and status"),
            &["operation", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "authgate_request_duration_seconds",
                "Remote call latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]),
            &["operation"],
        )?;

        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(logins_total.clone()))?;
        registry.register(Box::new(verifications_total.clone()))?;
        registry.register(Box::new(refreshes_total.clone()))?;
        registry.register(Box::new(token_reuse_total.clone()))?;
        registry.register(Box::new(revocations_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            registrations_total,
            logins_total,
            verifications_total,
            refreshes_total,
            token_reuse_total,
            revocations_total,
            requests_total,
            request_duration,
        })
    }

    pub fn record_registration(&self) {
        self.registrations_total.inc();
    }

    pub fn record_login(&self, outcome: &str) {
        self.logins_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_verification(&self, outcome: &str) {
        self.verifications_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_refresh(&self, outcome: &str) {
        self.refreshes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_token_reuse(&self) {
        self.token_reuse_total.inc();
    }

    /// `scope` is one of `session`, `chain`, `user`
    pub fn record_revocations(&self, scope: &str, count: usize) {
        self.revocations_total
            .with_label_values(&[scope])
            .inc_by(count as u64);
    }

    pub fn record_request(&self, operation: &str, status: &str, elapsed: Duration) {
        self.requests_total
            .with_label_values(&[operation, status])
            .inc();
        self.request_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn token_reuse_count(&self) -> u64 {
        self.token_reuse_total.get()
    }

    pub fn registration_count(&self) -> u64 {
        self.registrations_total.get()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}
