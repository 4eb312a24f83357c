use confique::Config;
use std::fmt;
use std::str::FromStr;

/// Specifies which token registry store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryStore {
    #[default]
    InMemory,
    Redis,
}

impl FromStr for RegistryStore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RegistryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Configuration for the token registry
#[derive(Debug, Config, Clone)]
pub struct RegistryConfig {
    /// Registry store type: "memory" or "redis" (default: memory)
    #[config(env = "AUTH_REGISTRY_STORE", default = "memory")]
    pub store: String,

    /// Redis connection string
    #[config(env = "AUTH_REGISTRY_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Upper bound for every registry operation in milliseconds (default: 2000)
    #[config(env = "AUTH_REGISTRY_TIMEOUT_MS", default = 2000)]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: "memory".to_string(),
            redis_url: None,
            timeout_ms: 2000,
        }
    }
}
