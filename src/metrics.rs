//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Policy metrics
    pub static ref POLICY_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_policy_resolutions_total", "Total number of policy resolutions persisted"),
        &["outcome"]
    ).expect("metric can be created");

    // Delivery metrics
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_delivery_attempts_total", "Total number of delivery attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref RETRY_SWEEPS_TOTAL: IntCounter = IntCounter::new(
        "fedgate_retry_sweeps_total",
        "Total number of failed-delivery retry sweeps"
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedgate_federation_requests_total", "Total number of outbound federation requests"),
        &["direction", "status"]
    ).expect("metric can be created");
    pub static ref RATE_LIMIT_WAIT_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "fedgate_rate_limit_wait_seconds",
            "Time spent waiting on the shared outbound rate limiter"
        ).buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
    ).expect("metric can be created");
}

/// Register all instruments with the global registry.
///
/// Safe to call once at startup; duplicate registration errors are ignored
/// so tests that build multiple states do not panic.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(POLICY_RESOLUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RETRY_SWEEPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(FEDERATION_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RATE_LIMIT_WAIT_SECONDS.clone()));
}

/// Encode the registry in the Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, crate::error::AppError> {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!("metrics encoding: {}", e)))
}
