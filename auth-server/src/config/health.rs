use confique::Config;

/// Dependency health monitoring configuration
#[derive(Debug, Config, Clone)]
pub struct HealthConfig {
    /// Timeout for a single dependency check in milliseconds (default: 2000)
    #[config(env = "AUTH_HEALTH_CHECK_TIMEOUT_MS", default = 2000)]
    pub check_timeout_ms: u64,

    /// Interval between background health checks in seconds (default: 10)
    #[config(env = "AUTH_HEALTH_CHECK_INTERVAL", default = 10)]
    pub check_interval: u64,

    /// Latency above which a dependency is reported degraded, in milliseconds (default: 1000)
    #[config(env = "AUTH_HEALTH_SLOW_THRESHOLD_MS", default = 1000)]
    pub slow_threshold_ms: u64,

    /// Maximum number of dependency checks running at once (default: 4)
    #[config(env = "AUTH_HEALTH_MAX_CONCURRENCY", default = 4)]
    pub max_concurrency: usize,

    /// Consecutive failed cycles of a fail-fast dependency before the
    /// running service is marked failed (default: 3)
    #[config(env = "AUTH_HEALTH_FAILURE_THRESHOLD", default = 3)]
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 2000,
            check_interval: 10,
            slow_threshold_ms: 1000,
            max_concurrency: 4,
            failure_threshold: 3,
        }
    }
}
