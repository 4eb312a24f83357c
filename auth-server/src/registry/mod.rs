use crate::config::snapshot::RegistrySettings;
use crate::config::RegistryStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry operation timed out after {0}ms")]
    Timeout(u128),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Failed to (de)serialize registry entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Token family {0} already exists")]
    Conflict(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<::redis::RedisError> for RegistryError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

/// Registry entry for one refresh-token generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub family_id: String,
    pub generation: u64,
    /// Owner subject
    pub subject: String,
    /// SHA-256 of the token string, binds the record to exactly one token
    pub fingerprint: String,
    pub active: bool,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
    pub revocation_reason: Option<String>,
    pub previous_generation: Option<u64>,
}

impl TokenRecord {
    /// First generation of a new family
    pub fn initial(
        family_id: impl Into<String>,
        subject: impl Into<String>,
        fingerprint: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            family_id: family_id.into(),
            generation: 1,
            subject: subject.into(),
            fingerprint: fingerprint.into(),
            active: true,
            created_at,
            last_used_at: None,
            revocation_reason: None,
            previous_generation: None,
        }
    }

    /// Next generation in the same family
    #[cfg(test)]
    pub fn successor(&self, fingerprint: impl Into<String>, created_at: i64) -> Self {
        Self {
            family_id: self.family_id.clone(),
            generation: self.generation + 1,
            subject: self.subject.clone(),
            fingerprint: fingerprint.into(),
            active: true,
            created_at,
            last_used_at: None,
            revocation_reason: None,
            previous_generation: Some(self.generation),
        }
    }
}

/// Result of the atomic claim-and-advance operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented generation was current and is now inactive
    Rotated,
    /// The presented generation was already rotated, or its fingerprint differs
    Reused,
    /// The family is revoked
    Revoked,
    /// Unknown or expired family
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Logout,
    ReuseDetected,
    Admin,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::ReuseDetected => "reuse_detected",
            Self::Admin => "admin",
        }
    }
}

/// Source of truth for refresh-token families.
///
/// `rotate` and `revoke_family` must be atomic at the storage layer, across
/// every process sharing the store.
#[async_trait::async_trait]
pub trait TokenRegistry: Send + Sync {
    /// Create a new family with `record` as its first generation
    async fn register(&self, record: TokenRecord, ttl: Duration) -> Result<(), RegistryError>;

    /// Mark `presented_generation` inactive and make `next` the current
    /// generation, if and only if the presented token is still current.
    async fn rotate(
        &self,
        family_id: &str,
        presented_generation: u64,
        presented_fingerprint: &str,
        next: TokenRecord,
        ttl: Duration,
    ) -> Result<RotateOutcome, RegistryError>;

    /// Revoke every generation of the family. Returns `true` if this call
    /// revoked it, `false` if it was already revoked or is unknown.
    async fn revoke_family(
        &self,
        family_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, RegistryError>;

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, RegistryError>;

    /// Stored record, with the family's revocation applied
    async fn record(
        &self,
        family_id: &str,
        generation: u64,
    ) -> Result<Option<TokenRecord>, RegistryError>;

    /// Store a use-once value. Returns `false` if the key already exists.
    async fn store_nonce(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, RegistryError>;

    /// Remove and return a use-once value
    async fn take_nonce(&self, key: &str) -> Result<Option<String>, RegistryError>;

    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Registry backend chosen at startup
#[derive(Clone)]
pub enum Registry {
    InMemory(memory::InMemoryRegistry),
    Redis(redis::RedisRegistry),
}

impl Registry {
    pub fn store(&self) -> RegistryStore {
        match self {
            Self::InMemory(_) => RegistryStore::InMemory,
            Self::Redis(_) => RegistryStore::Redis,
        }
    }
}

#[async_trait::async_trait]
impl TokenRegistry for Registry {
    async fn register(&self, record: TokenRecord, ttl: Duration) -> Result<(), RegistryError> {
        match self {
            Self::InMemory(registry) => registry.register(record, ttl).await,
            Self::Redis(registry) => registry.register(record, ttl).await,
        }
    }

    async fn rotate(
        &self,
        family_id: &str,
        presented_generation: u64,
        presented_fingerprint: &str,
        next: TokenRecord,
        ttl: Duration,
    ) -> Result<RotateOutcome, RegistryError> {
        match self {
            Self::InMemory(registry) => {
                registry
                    .rotate(family_id, presented_generation, presented_fingerprint, next, ttl)
                    .await
            }
            Self::Redis(registry) => {
                registry
                    .rotate(family_id, presented_generation, presented_fingerprint, next, ttl)
                    .await
            }
        }
    }

    async fn revoke_family(
        &self,
        family_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, RegistryError> {
        match self {
            Self::InMemory(registry) => registry.revoke_family(family_id, reason).await,
            Self::Redis(registry) => registry.revoke_family(family_id, reason).await,
        }
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, RegistryError> {
        match self {
            Self::InMemory(registry) => registry.is_family_revoked(family_id).await,
            Self::Redis(registry) => registry.is_family_revoked(family_id).await,
        }
    }

    async fn record(
        &self,
        family_id: &str,
        generation: u64,
    ) -> Result<Option<TokenRecord>, RegistryError> {
        match self {
            Self::InMemory(registry) => registry.record(family_id, generation).await,
            Self::Redis(registry) => registry.record(family_id, generation).await,
        }
    }

    async fn store_nonce(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        match self {
            Self::InMemory(registry) => registry.store_nonce(key, value, ttl).await,
            Self::Redis(registry) => registry.store_nonce(key, value, ttl).await,
        }
    }

    async fn take_nonce(&self, key: &str) -> Result<Option<String>, RegistryError> {
        match self {
            Self::InMemory(registry) => registry.take_nonce(key).await,
            Self::Redis(registry) => registry.take_nonce(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(registry) => registry.health_check().await,
            Self::Redis(registry) => registry.health_check().await,
        }
    }
}

/// Create the registry backend selected in `settings`
pub async fn create_registry(settings: &RegistrySettings) -> Result<Registry, RegistryError> {
    match settings.store {
        RegistryStore::InMemory => Ok(Registry::InMemory(memory::InMemoryRegistry::new())),
        RegistryStore::Redis => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                RegistryError::Config("Redis URL is required for the redis registry".to_string())
            })?;
            let registry = tokio::time::timeout(settings.timeout, redis::RedisRegistry::new(url))
                .await
                .map_err(|_| RegistryError::Timeout(settings.timeout.as_millis()))??;
            Ok(Registry::Redis(registry))
        }
    }
}
