//! Component health reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Liveness/readiness of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Alive,
    Ready,
    Degraded,
    Failed,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Ranking used to aggregate: the worst component wins.
    fn severity(&self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Alive => 1,
            Self::Degraded => 2,
            Self::Failed => 3,
        }
    }
}

/// Health of one component with its last recorded error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn ready() -> Self {
        Self {
            status: ComponentStatus::Ready,
            last_error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            last_error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Failed,
            last_error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Aggregate health report returned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub metrics: Value,
    pub reported_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Aggregate component reports; overall status is the worst one.
    pub fn aggregate(components: BTreeMap<String, ComponentHealth>, metrics: Value) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(ComponentStatus::Ready);
        Self {
            status,
            components,
            metrics,
            reported_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_component_dominates() {
        let mut components = BTreeMap::new();
        components.insert("bus".to_string(), ComponentHealth::ready());
        components.insert("knowledge".to_string(), ComponentHealth::degraded("cache cold"));
        let health = SystemHealth::aggregate(components, Value::Null);
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[test]
    fn test_empty_system_is_ready() {
        let health = SystemHealth::aggregate(BTreeMap::new(), Value::Null);
        assert_eq!(health.status, ComponentStatus::Ready);
    }
}
