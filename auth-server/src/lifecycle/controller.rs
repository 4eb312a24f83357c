use super::policy::{EnvironmentPolicy, PolicyClass, PolicyDecision};
use crate::config::{ConfigurationError, Environment};
use chrono::{DateTime, Utc};
use dependency_watchdog::{DependencyClass, DependencyState, HealthMonitor, HealthSnapshot};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Initializing,
    Validating,
    Ready,
    Degraded,
    /// Terminal, the process exits non-zero
    Failed,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Initializing, Validating | ShuttingDown)
                | (Validating, Ready | Degraded | Failed | ShuttingDown)
                | (Ready, Degraded | Failed | ShuttingDown)
                | (Degraded, Ready | Failed | ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }

    /// Ready or Degraded
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Validating => "VALIDATING",
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// What readers see: the current state and the latest dependency snapshot
#[derive(Debug, Clone)]
pub struct LifecycleView {
    pub state: LifecycleState,
    pub since: DateTime<Utc>,
    pub reason: String,
    pub dependencies: HealthSnapshot,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("Startup failed: {0}")]
    StartupFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LivenessReport {
    pub status: LivenessStatus,
    pub environment: Environment,
    pub state: LifecycleState,
    /// Present while the database is not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "unavailable")]
    pub database_status: Option<DependencyState>,
    #[schema(value_type = Object)]
    pub dependencies: BTreeMap<String, DependencyState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NotReady,
}

/// Body of `GET /health/ready`
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::Ready
    }
}

enum Assessment {
    Healthy,
    Degraded(String),
    Fatal(String),
}

/// Owns the lifecycle state. It is the only writer; handlers read through
/// [`liveness`](Self::liveness), [`readiness`](Self::readiness) or a
/// [`subscribe`](Self::subscribe)d receiver.
#[derive(Debug)]
pub struct ServiceLifecycleController {
    environment: Environment,
    failure_threshold: u32,
    view: watch::Sender<LifecycleView>,
    /// Also serializes transitions
    history: Mutex<Vec<Transition>>,
    fail_fast_streak: AtomicU32,
}

impl ServiceLifecycleController {
    pub fn new(environment: Environment, failure_threshold: u32) -> Self {
        let (view, _) = watch::channel(LifecycleView {
            state: LifecycleState::Initializing,
            since: Utc::now(),
            reason: "process started".to_string(),
            dependencies: HealthSnapshot::new(),
        });
        Self {
            environment,
            failure_threshold: failure_threshold.max(1),
            view,
            history: Mutex::new(Vec::new()),
            fail_fast_streak: AtomicU32::new(0),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn state(&self) -> LifecycleState {
        self.view.borrow().state
    }

    pub fn current(&self) -> LifecycleView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleView> {
        self.view.subscribe()
    }

    /// Every transition so far, oldest first
    pub fn history(&self) -> Vec<Transition> {
        self.lock_history().clone()
    }

    /// Enter VALIDATING and apply the policy to the configuration issues
    pub fn validate_configuration(
        &self,
        issues: &[ConfigurationError],
    ) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Validating, "validating configuration")?;
        if issues.is_empty() {
            return Ok(());
        }

        match EnvironmentPolicy::decide(self.environment, PolicyClass::Configuration) {
            PolicyDecision::FailFast => {
                let summary = issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                let reason = format!("invalid configuration: {summary}");
                self.transition(LifecycleState::Failed, reason.clone())?;
                Err(LifecycleError::StartupFailed(reason))
            }
            PolicyDecision::Degrade => {
                for issue in issues {
                    warn!("Configuration issue in {}: {}", self.environment, issue);
                }
                Ok(())
            }
        }
    }

    /// Leave VALIDATING based on the first dependency snapshot
    pub fn complete_startup(
        &self,
        snapshot: HealthSnapshot,
    ) -> Result<LifecycleState, LifecycleError> {
        let assessment = self.assess(&snapshot);
        self.record_dependencies(snapshot);
        match assessment {
            Assessment::Fatal(reason) => {
                self.transition(LifecycleState::Failed, reason.clone())?;
                Err(LifecycleError::StartupFailed(reason))
            }
            Assessment::Degraded(reason) => {
                self.transition(LifecycleState::Degraded, reason)?;
                Ok(LifecycleState::Degraded)
            }
            Assessment::Healthy => {
                self.transition(LifecycleState::Ready, "all dependencies healthy")?;
                Ok(LifecycleState::Ready)
            }
        }
    }

    /// Fail a startup step that has no dependency check behind it
    pub fn abort_startup(&self, reason: impl Into<String>) -> LifecycleError {
        let reason = reason.into();
        if let Err(e) = self.transition(LifecycleState::Failed, reason.clone()) {
            return e;
        }
        LifecycleError::StartupFailed(reason)
    }

    /// Validate the configuration, check every dependency once and settle
    /// on READY, DEGRADED or FAILED.
    pub async fn start(
        &self,
        issues: &[ConfigurationError],
        monitor: &HealthMonitor,
    ) -> Result<LifecycleState, LifecycleError> {
        self.validate_configuration(issues)?;
        let snapshot = monitor.check_all().await;
        self.complete_startup(snapshot)
    }

    /// Apply one runtime snapshot and return the resulting state.
    ///
    /// Outside READY/DEGRADED only the dependency view is updated. A
    /// fail-fast dependency has to be down for `failure_threshold`
    /// consecutive snapshots before the service moves to FAILED.
    pub fn apply_health(&self, snapshot: HealthSnapshot) -> LifecycleState {
        let assessment = self.assess(&snapshot);
        self.record_dependencies(snapshot);
        if !self.state().is_serving() {
            return self.state();
        }

        let result = match assessment {
            Assessment::Healthy => {
                self.fail_fast_streak.store(0, Ordering::Relaxed);
                self.transition(LifecycleState::Ready, "all dependencies healthy")
            }
            Assessment::Degraded(reason) => {
                self.fail_fast_streak.store(0, Ordering::Relaxed);
                self.transition(LifecycleState::Degraded, reason)
            }
            Assessment::Fatal(reason) => {
                let streak = self.fail_fast_streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak >= self.failure_threshold {
                    self.transition(
                        LifecycleState::Failed,
                        format!("{reason} for {streak} consecutive checks"),
                    )
                } else {
                    warn!(
                        "{} ({}/{} before failing)",
                        reason, streak, self.failure_threshold
                    );
                    self.transition(LifecycleState::Degraded, reason)
                }
            }
        };
        if let Err(e) = result {
            // Lost a race with shutdown
            debug!("Ignoring health update: {}", e);
        }
        self.state()
    }

    /// Feed every snapshot from `snapshots` into [`apply_health`](Self::apply_health)
    /// until the channel closes or the service stops serving.
    pub fn follow(self: Arc<Self>, mut snapshots: watch::Receiver<HealthSnapshot>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if !self.apply_health(snapshot).is_serving() {
                    break;
                }
            }
            debug!("Stopped following dependency health");
        })
    }

    /// Returns `false` if the service was not in a state that can shut down
    pub fn begin_shutdown(&self, reason: &str) -> bool {
        match self.transition(LifecycleState::ShuttingDown, reason) {
            Ok(()) => true,
            Err(e) => {
                debug!("Not shutting down: {}", e);
                false
            }
        }
    }

    pub fn mark_stopped(&self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Stopped, "shutdown complete")
    }

    pub fn liveness(&self) -> LivenessReport {
        let view = self.view.borrow();
        let dependencies: BTreeMap<String, DependencyState> = view
            .dependencies
            .iter()
            .map(|(name, status)| (name.clone(), status.state))
            .collect();
        let database_status = view
            .dependencies
            .values()
            .find(|status| status.class == DependencyClass::Database)
            .map(|status| status.state)
            .filter(|state| *state != DependencyState::Healthy);

        let status = match view.state {
            LifecycleState::Failed | LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                LivenessStatus::Unhealthy
            }
            LifecycleState::Ready
                if dependencies
                    .values()
                    .all(|state| *state == DependencyState::Healthy) =>
            {
                LivenessStatus::Healthy
            }
            _ => LivenessStatus::Degraded,
        };

        LivenessReport {
            status,
            environment: self.environment,
            state: view.state,
            database_status,
            dependencies,
        }
    }

    /// Ready only while serving and with the database reachable, in every
    /// environment.
    pub fn readiness(&self) -> ReadinessReport {
        let view = self.view.borrow();
        let reason = match view.state {
            LifecycleState::Ready | LifecycleState::Degraded => view
                .dependencies
                .values()
                .find(|status| status.class == DependencyClass::Database && status.is_unavailable())
                .map(|_| "database unavailable".to_string()),
            LifecycleState::Initializing | LifecycleState::Validating => {
                Some("service is starting".to_string())
            }
            LifecycleState::Failed => Some("service has failed".to_string()),
            LifecycleState::ShuttingDown | LifecycleState::Stopped => {
                Some("service is shutting down".to_string())
            }
        };

        ReadinessReport {
            status: if reason.is_none() {
                ReadinessStatus::Ready
            } else {
                ReadinessStatus::NotReady
            },
            reason,
        }
    }

    fn assess(&self, snapshot: &HealthSnapshot) -> Assessment {
        let mut fatal = Vec::new();
        let mut degraded = Vec::new();

        for status in snapshot.values() {
            match status.state {
                DependencyState::Healthy => {}
                DependencyState::Degraded => degraded.push(format!("{} is slow", status.name)),
                DependencyState::Unavailable => {
                    warn!(
                        "Dependency {} is unavailable: {}",
                        status.name,
                        status.error.as_deref().unwrap_or("unknown error")
                    );
                    let reason = format!("{} unavailable", status.name);
                    match EnvironmentPolicy::decide(self.environment, status.class) {
                        PolicyDecision::FailFast => fatal.push(reason),
                        PolicyDecision::Degrade => degraded.push(reason),
                    }
                }
            }
        }

        if !fatal.is_empty() {
            Assessment::Fatal(fatal.join(", "))
        } else if !degraded.is_empty() {
            Assessment::Degraded(degraded.join(", "))
        } else {
            Assessment::Healthy
        }
    }

    fn record_dependencies(&self, snapshot: HealthSnapshot) {
        self.view.send_modify(|view| view.dependencies = snapshot);
    }

    fn transition(&self, to: LifecycleState, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let mut history = self.lock_history();
        let from = self.view.borrow().state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        let reason = reason.into();
        let at = Utc::now();
        if to == LifecycleState::Failed {
            error!("Lifecycle {} -> {}: {}", from, to, reason);
        } else {
            info!("Lifecycle {} -> {}: {}", from, to, reason);
        }
        self.view.send_modify(|view| {
            view.state = to;
            view.since = at;
            view.reason.clone_from(&reason);
        });
        history.push(Transition {
            from,
            to,
            at,
            reason,
        });
        Ok(())
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<Transition>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
