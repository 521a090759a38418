//! Coordination metrics
//!
//! Every metric is registered on a registry owned by
//! [`CoordinationMetrics`], so several coordinators in one process (or one
//! test binary) never collide. Label sets are fixed and small: outcomes,
//! scopes, and the configured categories.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

use crate::ROUTE_LATENCY_BUCKETS;

/// Metrics errors
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics text encoding failed: {0}")]
    Encoding(String),
}

/// Why a registration was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    Capacity,
    Validation,
    UnknownCategory,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Capacity => "capacity",
            RejectionReason::Validation => "validation",
            RejectionReason::UnknownCategory => "unknown_category",
        }
    }
}

/// Prometheus metrics for one coordinator
#[derive(Debug, Clone)]
pub struct CoordinationMetrics {
    registry: Registry,
    agents_registered: IntGauge,
    registrations_total: IntCounter,
    unregistrations_total: IntCounter,
    registration_rejections_total: IntCounterVec, // reason
    route_calls_total: IntCounterVec,             // scope: all|category
    route_latency_seconds: HistogramVec,          // scope
    gossip_messages_total: IntCounterVec,         // outcome: accepted|rejected
    consensus_proposals_total: IntCounterVec,     // category, outcome
    leader_elections_total: IntCounterVec,        // category
}

impl CoordinationMetrics {
    /// Create metrics on a fresh registry, prefixing names with `namespace`
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;

        let agents_registered =
            IntGauge::with_opts(Opts::new("agents_registered", "Agents currently registered"))?;
        let registrations_total = IntCounter::with_opts(Opts::new(
            "agent_registrations_total",
            "Successful agent registrations",
        ))?;
        let unregistrations_total = IntCounter::with_opts(Opts::new(
            "agent_unregistrations_total",
            "Agent unregistrations",
        ))?;
        let registration_rejections_total = IntCounterVec::new(
            Opts::new(
                "agent_registration_rejections_total",
                "Refused agent registrations by reason",
            ),
            &["reason"],
        )?;
        let route_calls_total = IntCounterVec::new(
            Opts::new("route_calls_total", "Routing calls by scope"),
            &["scope"],
        )?;
        let route_latency_seconds = HistogramVec::new(
            HistogramOpts::new("route_latency_seconds", "Routing latency in seconds by scope")
                .buckets(ROUTE_LATENCY_BUCKETS.to_vec()),
            &["scope"],
        )?;
        let gossip_messages_total = IntCounterVec::new(
            Opts::new("gossip_messages_total", "Inbound gossip messages by outcome"),
            &["outcome"],
        )?;
        let consensus_proposals_total = IntCounterVec::new(
            Opts::new(
                "consensus_proposals_total",
                "Consensus proposals by category and outcome",
            ),
            &["category", "outcome"],
        )?;
        let leader_elections_total = IntCounterVec::new(
            Opts::new(
                "leader_elections_total",
                "Elections won by this node per category",
            ),
            &["category"],
        )?;

        registry.register(Box::new(agents_registered.clone()))?;
        registry.register(Box::new(registrations_total.clone()))?;
        registry.register(Box::new(unregistrations_total.clone()))?;
        registry.register(Box::new(registration_rejections_total.clone()))?;
        registry.register(Box::new(route_calls_total.clone()))?;
        registry.register(Box::new(route_latency_seconds.clone()))?;
        registry.register(Box::new(gossip_messages_total.clone()))?;
        registry.register(Box::new(consensus_proposals_total.clone()))?;
        registry.register(Box::new(leader_elections_total.clone()))?;

        Ok(Self {
            registry,
            agents_registered,
            registrations_total,
            unregistrations_total,
            registration_rejections_total,
            route_calls_total,
            route_latency_seconds,
            gossip_messages_total,
            consensus_proposals_total,
            leader_elections_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_registration(&self, registered_now: usize) {
        self.registrations_total.inc();
        self.set_agents_registered(registered_now);
    }

    pub fn record_unregistration(&self, registered_now: usize) {
        self.unregistrations_total.inc();
        self.set_agents_registered(registered_now);
    }

    pub fn record_rejection(&self, reason: RejectionReason) {
        self.registration_rejections_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Record one routing call; `category_scoped` selects the scope label
    pub fn record_route(&self, category_scoped: bool, latency: Duration) {
        let scope = if category_scoped { "category" } else { "all" };
        self.route_calls_total.with_label_values(&[scope]).inc();
        self.route_latency_seconds
            .with_label_values(&[scope])
            .observe(latency.as_secs_f64());
    }

    pub fn record_gossip_message(&self, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.gossip_messages_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_proposal(&self, category: &str, committed: bool) {
        let outcome = if committed { "committed" } else { "failed" };
        self.consensus_proposals_total
            .with_label_values(&[category, outcome])
            .inc();
    }

    /// Add `count` elections won in `category`
    pub fn record_elections(&self, category: &str, count: u64) {
        if count > 0 {
            self.leader_elections_total
                .with_label_values(&[category])
                .inc_by(count);
        }
    }

    fn set_agents_registered(&self, count: usize) {
        self.agents_registered
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
