use crate::check::DependencyClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// State of a single dependency after one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Healthy,
    /// Answered correctly but slower than the configured threshold
    Degraded,
    Unavailable,
}

/// Result of checking one dependency. Built fresh on every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub class: DependencyClass,
    pub state: DependencyState,
    pub checked_at: DateTime<Utc>,
    pub latency_ms: u64,
    /// Internal error detail. Meant for logs, not for response bodies.
    pub error: Option<String>,
}

impl DependencyStatus {
    pub(crate) fn from_result(
        name: &str,
        class: DependencyClass,
        latency: Duration,
        slow_threshold: Duration,
        result: Result<(), String>,
    ) -> Self {
        let (state, error) = match result {
            Ok(()) if latency > slow_threshold => (DependencyState::Degraded, None),
            Ok(()) => (DependencyState::Healthy, None),
            Err(e) => (DependencyState::Unavailable, Some(e)),
        };
        Self {
            name: name.to_string(),
            class,
            state,
            checked_at: Utc::now(),
            latency_ms: latency.as_millis().try_into().unwrap_or(u64::MAX),
            error,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.state == DependencyState::Unavailable
    }
}

/// All statuses from one monitor cycle, keyed by dependency name
pub type HealthSnapshot = BTreeMap<String, DependencyStatus>;
