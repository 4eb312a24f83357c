use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fmt::Write;
use std::time::Duration;

/// Error type returned by a failed dependency check
pub type CheckError = Box<dyn std::error::Error + Send + Sync>;

/// The tier a dependency belongs to.
///
/// Callers use the class to decide how an outage is handled (fail fast or
/// keep serving in a degraded mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyClass {
    Database,
    Cache,
    OAuthProvider,
}

/// Trait for checks against an external dependency
#[async_trait]
pub trait DependencyCheck: Send + Sync + Debug + 'static {
    /// Stable name of the dependency, used as the key in status snapshots
    fn name(&self) -> &str;

    /// Class of the dependency
    fn class(&self) -> DependencyClass;

    /// Check the dependency once.
    /// Returns Ok(()) if it answered correctly, Err otherwise.
    ///
    /// The monitor enforces its own timeout around this call.
    async fn check(&self) -> Result<(), CheckError>;
}

/// HTTP-based dependency check (GET and compare the status code)
#[derive(Debug, Clone)]
pub struct HttpDependencyCheck {
    name: String,
    class: DependencyClass,
    client: reqwest::Client,
    url: String,
    expected_status: u16,
}

impl HttpDependencyCheck {
    /// Create a new HTTP check expecting `200 OK`
    pub fn new(name: impl Into<String>, class: DependencyClass, url: impl Into<String>) -> Self {
        Self::with_options(name, class, url, 200, Duration::from_secs(5))
    }

    /// Create a new HTTP check with custom options
    pub fn with_options(
        name: impl Into<String>,
        class: DependencyClass,
        url: impl Into<String>,
        expected_status: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
            expected_status,
        }
    }
}

/// Flatten an error and its sources into one line
pub fn report(mut err: &dyn std::error::Error) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}

#[async_trait]
impl DependencyCheck for HttpDependencyCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> DependencyClass {
        self.class
    }

    async fn check(&self) -> Result<(), CheckError> {
        debug!("Checking '{}' at URL: {}", self.name, self.url);
        let response = match self.client.get(&self.url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return Err(format!("HTTP request failed: {}", report(&e)).into());
            }
        };
        let status_code = response.status().as_u16();
        if status_code == self.expected_status {
            Ok(())
        } else {
            Err(format!(
                "Unexpected status code: {} (expected {})",
                status_code, self.expected_status
            )
            .into())
        }
    }
}
