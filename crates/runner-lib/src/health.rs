//! Health of the run's metric sources
//!
//! Every telemetry source and the disk-delta metric end the run with a
//! [`ComponentHealth`]; the summary reports them all, degraded ones
//! included, and derives the overall status from them.

use serde::{Deserialize, Serialize};

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Produced a complete result
    Healthy,
    /// Produced a result, but with missing or suspect input
    Degraded,
    /// Produced no usable result
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component produced at least a partial result
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Healthy => write!(f, "healthy"),
            ComponentStatus::Degraded => write!(f, "degraded"),
            ComponentStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Information about a component's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ComponentStatus::Healthy
    }
}

/// Compute overall status from component statuses
pub fn compute_status<'a>(components: impl IntoIterator<Item = &'a ComponentHealth>) -> ComponentStatus {
    let mut has_degraded = false;

    for health in components {
        match health.status {
            ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
            ComponentStatus::Degraded => has_degraded = true,
            ComponentStatus::Healthy => {}
        }
    }

    if has_degraded {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    }
}
