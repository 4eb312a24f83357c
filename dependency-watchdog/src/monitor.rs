use crate::check::{DependencyCheck, report};
use crate::status::{DependencyStatus, HealthSnapshot};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Options for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorOptions {
    /// Upper bound for a single check (default: 2 s)
    pub check_timeout: Duration,
    /// Latency above which a successful check is reported as degraded (default: 1 s)
    pub slow_threshold: Duration,
    /// Maximum number of checks running at the same time (default: 4)
    pub max_concurrency: usize,
}

impl Default for HealthMonitorOptions {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(2),
            slow_threshold: Duration::from_secs(1),
            max_concurrency: 4,
        }
    }
}

/// Runs every registered dependency check concurrently, each under its own timeout.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    checks: Vec<Arc<dyn DependencyCheck>>,
    opt: HealthMonitorOptions,
}

impl HealthMonitor {
    pub fn new(opt: HealthMonitorOptions) -> Self {
        Self {
            checks: Vec::new(),
            opt,
        }
    }

    /// Register a check, builder style
    pub fn with_check<C: DependencyCheck>(mut self, check: C) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    /// Register a shared check
    pub fn add_check(&mut self, check: Arc<dyn DependencyCheck>) {
        self.checks.push(check);
    }

    /// Names of the registered dependencies
    pub fn dependency_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn options(&self) -> &HealthMonitorOptions {
        &self.opt
    }

    /// Check all dependencies.
    ///
    /// A check exceeding the timeout is reported as unavailable instead of
    /// blocking the caller. The timeout also covers the wait for a
    /// concurrency permit, so the whole call is bounded by one timeout even
    /// with more checks than permits.
    pub async fn check_all(&self) -> HealthSnapshot {
        let semaphore = Arc::new(Semaphore::new(self.opt.max_concurrency.max(1)));

        let handles: Vec<_> = self
            .checks
            .iter()
            .map(|check| {
                let name = check.name().to_string();
                let class = check.class();
                let check = Arc::clone(check);
                let semaphore = Arc::clone(&semaphore);
                let opt = self.opt.clone();
                let handle =
                    tokio::spawn(async move { run_check(check.as_ref(), &semaphore, &opt).await });
                (name, class, handle)
            })
            .collect();

        let mut snapshot = HealthSnapshot::new();
        for (name, class, handle) in handles {
            let status = handle.await.unwrap_or_else(|e| {
                error!("{} check task panicked: {e:?}", name);
                DependencyStatus::from_result(
                    &name,
                    class,
                    Duration::ZERO,
                    self.opt.slow_threshold,
                    Err(format!("{} check task failed", name)),
                )
            });
            snapshot.insert(name, status);
        }
        debug!("Checked {} dependencies", snapshot.len());
        snapshot
    }
}

async fn run_check(
    check: &dyn DependencyCheck,
    semaphore: &Semaphore,
    opt: &HealthMonitorOptions,
) -> DependencyStatus {
    let started = Instant::now();
    let attempt = async {
        // Closed only if the semaphore is dropped, which cannot happen here
        let _permit = semaphore.acquire().await.ok();
        check.check().await
    };
    let result = match timeout(opt.check_timeout, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(report(e.as_ref())),
        Err(_) => Err(format!(
            "{} check timed out after {}ms",
            check.name(),
            opt.check_timeout.as_millis()
        )),
    };
    let latency = started.elapsed();

    if let Err(e) = &result {
        warn!("Dependency '{}' is unavailable: {}", check.name(), e);
    }
    DependencyStatus::from_result(
        check.name(),
        check.class(),
        latency,
        opt.slow_threshold,
        result,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::check::{CheckError, DependencyClass};
    use crate::status::DependencyState;
    use async_trait::async_trait;
    use tokio::time::sleep;

    /// Check with a fixed delay and outcome
    #[derive(Debug)]
    pub(crate) struct FakeCheck {
        pub name: &'static str,
        pub class: DependencyClass,
        pub delay: Duration,
        pub fail: bool,
    }

    impl FakeCheck {
        pub(crate) fn ok(name: &'static str, class: DependencyClass) -> Self {
            Self {
                name,
                class,
                delay: Duration::ZERO,
                fail: false,
            }
        }

        pub(crate) fn failing(name: &'static str, class: DependencyClass) -> Self {
            Self {
                fail: true,
                ..Self::ok(name, class)
            }
        }

        pub(crate) fn slow(name: &'static str, class: DependencyClass, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok(name, class)
            }
        }
    }

    #[async_trait]
    impl DependencyCheck for FakeCheck {
        fn name(&self) -> &str {
            self.name
        }

        fn class(&self) -> DependencyClass {
            self.class
        }

        async fn check(&self) -> Result<(), CheckError> {
            sleep(self.delay).await;
            if self.fail {
                Err("connection refused".into())
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct PanickingCheck;

    #[async_trait]
    impl DependencyCheck for PanickingCheck {
        fn name(&self) -> &str {
            "panicky"
        }

        fn class(&self) -> DependencyClass {
            DependencyClass::Cache
        }

        async fn check(&self) -> Result<(), CheckError> {
            panic!("Intentional panic in dependency check");
        }
    }

    fn options(timeout_ms: u64) -> HealthMonitorOptions {
        HealthMonitorOptions {
            check_timeout: Duration::from_millis(timeout_ms),
            slow_threshold: Duration::from_millis(timeout_ms / 2),
            max_concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_check_all_reports_each_dependency() {
        let monitor = HealthMonitor::new(options(500))
            .with_check(FakeCheck::ok("database", DependencyClass::Database))
            .with_check(FakeCheck::failing("cache", DependencyClass::Cache));

        let snapshot = monitor.check_all().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["database"].state, DependencyState::Healthy);
        assert_eq!(snapshot["cache"].state, DependencyState::Unavailable);
        assert_eq!(snapshot["cache"].error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_check_timeout_reports_unavailable() {
        let monitor = HealthMonitor::new(options(100)).with_check(FakeCheck::slow(
            "database",
            DependencyClass::Database,
            Duration::from_secs(5),
        ));

        let started = Instant::now();
        let snapshot = monitor.check_all().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let status = &snapshot["database"];
        assert_eq!(status.state, DependencyState::Unavailable);
        assert_eq!(
            status.error.as_deref(),
            Some("database check timed out after 100ms")
        );
    }

    #[tokio::test]
    async fn test_checks_run_concurrently() {
        let monitor = HealthMonitor::new(options(400))
            .with_check(FakeCheck::slow(
                "database",
                DependencyClass::Database,
                Duration::from_secs(2),
            ))
            .with_check(FakeCheck::slow(
                "cache",
                DependencyClass::Cache,
                Duration::from_secs(2),
            ))
            .with_check(FakeCheck::slow(
                "oauth_provider",
                DependencyClass::OAuthProvider,
                Duration::from_secs(2),
            ));

        let started = Instant::now();
        let snapshot = monitor.check_all().await;
        let elapsed = started.elapsed();

        assert!(snapshot.values().all(|s| s.is_unavailable()));
        assert!(
            elapsed < Duration::from_millis(900),
            "Concurrent checks took too long: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_queued_checks_share_one_deadline() {
        let monitor = HealthMonitor::new(HealthMonitorOptions {
            max_concurrency: 1,
            ..options(400)
        })
        .with_check(FakeCheck::slow(
            "database",
            DependencyClass::Database,
            Duration::from_secs(2),
        ))
        .with_check(FakeCheck::slow(
            "cache",
            DependencyClass::Cache,
            Duration::from_secs(2),
        ))
        .with_check(FakeCheck::slow(
            "oauth_provider",
            DependencyClass::OAuthProvider,
            Duration::from_secs(2),
        ));

        let started = Instant::now();
        let snapshot = monitor.check_all().await;
        let elapsed = started.elapsed();

        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.values().all(|s| s.is_unavailable()));
        assert!(
            elapsed < Duration::from_millis(900),
            "Queued checks waited past the deadline: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_slow_check_is_degraded() {
        let monitor = HealthMonitor::new(options(400)).with_check(FakeCheck::slow(
            "cache",
            DependencyClass::Cache,
            Duration::from_millis(250),
        ));

        let snapshot = monitor.check_all().await;
        assert_eq!(snapshot["cache"].state, DependencyState::Degraded);
    }

    #[tokio::test]
    async fn test_panicking_check_is_unavailable() {
        let monitor = HealthMonitor::new(options(400))
            .with_check(PanickingCheck)
            .with_check(FakeCheck::ok("database", DependencyClass::Database));

        let snapshot = monitor.check_all().await;
        assert_eq!(snapshot["panicky"].state, DependencyState::Unavailable);
        assert_eq!(
            snapshot["panicky"].error.as_deref(),
            Some("panicky check task failed")
        );
        assert_eq!(snapshot["database"].state, DependencyState::Healthy);
    }
}
