//! Concrete dependency checks and the monitor wiring for this service

use crate::config::ConfigSnapshot;
use crate::registry::{Registry, TokenRegistry};
use async_trait::async_trait;
use dependency_watchdog::{
    CheckError, DependencyCheck, DependencyClass, HealthMonitor, HealthMonitorOptions,
    HttpDependencyCheck,
};
use log::{error, info};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DATABASE: &str = "database";
pub const CACHE: &str = "cache";
pub const OAUTH_PROVIDER: &str = "oauth_provider";

/// `SELECT 1` against Postgres over a small lazy pool
#[derive(Debug)]
pub struct DatabaseCheck {
    pool: Result<PgPool, String>,
}

impl DatabaseCheck {
    /// The pool connects on first use, so a database that is down at startup
    /// shows up as a failed check rather than a construction error.
    pub fn new(database_url: &str, acquire_timeout: Duration) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)
            .map_err(|e| {
                error!("Invalid database URL: {}", e);
                format!("invalid database URL: {e}")
            });
        Self { pool }
    }

    /// Stand-in when no database URL is configured. Always unavailable, so
    /// readiness never passes without a database.
    pub fn unconfigured() -> Self {
        Self {
            pool: Err("database not configured".to_string()),
        }
    }
}

#[async_trait]
impl DependencyCheck for DatabaseCheck {
    fn name(&self) -> &str {
        DATABASE
    }

    fn class(&self) -> DependencyClass {
        DependencyClass::Database
    }

    async fn check(&self) -> Result<(), CheckError> {
        let pool = self.pool.as_ref().map_err(|e| CheckError::from(e.clone()))?;
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }
}

/// Ping of the token registry store
pub struct RegistryCheck {
    registry: Arc<Registry>,
}

impl RegistryCheck {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl fmt::Debug for RegistryCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCheck")
            .field("store", &self.registry.store())
            .finish()
    }
}

#[async_trait]
impl DependencyCheck for RegistryCheck {
    fn name(&self) -> &str {
        CACHE
    }

    fn class(&self) -> DependencyClass {
        DependencyClass::Cache
    }

    async fn check(&self) -> Result<(), CheckError> {
        self.registry.health_check().await.map_err(CheckError::from)
    }
}

/// Monitor with one check per configured dependency
pub fn build_monitor(config: &ConfigSnapshot, registry: Arc<Registry>) -> HealthMonitor {
    let health = &config.health;
    let mut monitor = HealthMonitor::new(HealthMonitorOptions {
        check_timeout: health.check_timeout,
        slow_threshold: health.slow_threshold,
        max_concurrency: health.max_concurrency,
    })
    .with_check(RegistryCheck::new(registry));

    monitor = monitor.with_check(match &config.database_url {
        Some(url) => DatabaseCheck::new(url, health.check_timeout),
        None => DatabaseCheck::unconfigured(),
    });
    if let Some(url) = config.oauth.as_ref().and_then(|oauth| oauth.health_url.as_ref()) {
        monitor = monitor.with_check(HttpDependencyCheck::with_options(
            OAUTH_PROVIDER,
            DependencyClass::OAuthProvider,
            url.as_str(),
            200,
            health.check_timeout,
        ));
    }
    info!("Monitoring dependencies: {:?}", monitor.dependency_names());
    monitor
}
