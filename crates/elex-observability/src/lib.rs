//! ELEX Observability
//!
//! Logging initialisation, Prometheus metrics and health types shared by
//! the coordination layer. Nothing here is global: metrics live in a
//! registry owned by [`CoordinationMetrics`], and the only process-wide
//! effect is installing the tracing subscriber.

pub mod health;
pub mod metrics;
pub mod trace;

pub use health::{ComponentHealth, HealthStatus, SystemHealth};
pub use metrics::{CoordinationMetrics, MetricsError, RejectionReason};
pub use trace::{LogFormat, init_tracing};

use serde::{Deserialize, Serialize};

/// Latency buckets in seconds, tuned for in-memory routing
pub const ROUTE_LATENCY_BUCKETS: &[f64] = &[
    0.000_01, // 10us
    0.000_05, // 50us
    0.000_1,  // 100us
    0.000_25, // 250us
    0.000_5,  // 500us
    0.001,    // 1ms
    0.005,    // 5ms
    0.01,     // 10ms
    0.05,     // 50ms
];

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Output format of the fmt layer
    pub log_format: LogFormat,
    /// Metrics name prefix
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Pretty,
            namespace: "elex".to_string(),
        }
    }
}

/// Observability framework errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}
