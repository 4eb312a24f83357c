use crate::config::Environment;
use dependency_watchdog::DependencyClass;

/// What a defect in one class does to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Stop serving and exit
    FailFast,
    /// Keep serving, report degraded
    Degrade,
}

/// Classes of defects the policy knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
    /// Static configuration (secret, credentials, URLs)
    Configuration,
    Dependency(DependencyClass),
}

impl From<DependencyClass> for PolicyClass {
    fn from(class: DependencyClass) -> Self {
        Self::Dependency(class)
    }
}

use PolicyDecision::{Degrade, FailFast};

/// Columns follow `Environment::ALL`: development, test, staging, production
const TABLE: [(PolicyClass, [PolicyDecision; 4]); 4] = [
    (
        PolicyClass::Configuration,
        [Degrade, Degrade, FailFast, FailFast],
    ),
    (
        PolicyClass::Dependency(DependencyClass::Database),
        [Degrade, Degrade, FailFast, FailFast],
    ),
    (
        PolicyClass::Dependency(DependencyClass::Cache),
        [Degrade, Degrade, Degrade, Degrade],
    ),
    (
        PolicyClass::Dependency(DependencyClass::OAuthProvider),
        [Degrade, Degrade, Degrade, Degrade],
    ),
];

/// The one place that maps `(environment, class)` to fail-fast or degrade
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentPolicy;

impl EnvironmentPolicy {
    pub fn decide(environment: Environment, class: impl Into<PolicyClass>) -> PolicyDecision {
        let class = class.into();
        let column = match environment {
            Environment::Development => 0,
            Environment::Test => 1,
            Environment::Staging => 2,
            Environment::Production => 3,
        };
        TABLE
            .iter()
            .find(|(row, _)| *row == class)
            .map(|(_, decisions)| decisions[column])
            .unwrap_or(FailFast)
    }
}
