//! Health reporting types
//!
//! Components report a [`ComponentHealth`]; [`SystemHealth`] folds them
//! into one status where the worst component wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check status levels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Working, but with reduced guarantees
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(&self) -> &str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded { .. } => "degraded",
            HealthStatus::Unhealthy { .. } => "unhealthy",
        }
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded { .. } => 1,
            HealthStatus::Unhealthy { .. } => 2,
        }
    }
}

/// Health of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Healthy)
    }

    pub fn degraded(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::with_status(
            name,
            HealthStatus::Degraded {
                reason: reason.into(),
            },
        )
    }

    pub fn unhealthy(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::with_status(
            name,
            HealthStatus::Unhealthy {
                reason: reason.into(),
            },
        )
    }

    fn with_status(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            checked_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata to component health
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Overall health of a coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let status = Self::overall_status(&components);
        Self {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }

    fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
        let worst = components
            .iter()
            .map(|c| c.status.severity())
            .max()
            .unwrap_or(0);

        let reasons: Vec<String> = components
            .iter()
            .filter_map(|c| match &c.status {
                HealthStatus::Healthy => None,
                HealthStatus::Degraded { reason } | HealthStatus::Unhealthy { reason } => {
                    Some(format!("{}: {}", c.name, reason))
                }
            })
            .collect();

        match worst {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded {
                reason: reasons.join(", "),
            },
            _ => HealthStatus::Unhealthy {
                reason: reasons.join(", "),
            },
        }
    }
}
