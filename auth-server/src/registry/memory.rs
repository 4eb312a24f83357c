use super::{RegistryError, RevocationReason, RotateOutcome, TokenRecord, TokenRegistry};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Upper bound for any nonce lifetime; per-entry deadlines are checked on read
const MAX_NONCE_TTL: Duration = Duration::from_secs(3600);
const MAX_NONCES: u64 = 100_000;

#[derive(Debug)]
struct FamilyEntry {
    current_generation: u64,
    revocation_reason: Option<String>,
    records: BTreeMap<u64, TokenRecord>,
    expires_at: Instant,
}

impl FamilyEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Single-process registry. Rotation is atomic under one mutex, which makes
/// it suitable for development and tests only.
#[derive(Clone)]
pub struct InMemoryRegistry {
    families: Arc<Mutex<HashMap<String, FamilyEntry>>>,
    nonces: MokaCache<String, (String, Instant)>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            families: Arc::new(Mutex::new(HashMap::new())),
            nonces: MokaCache::builder()
                .time_to_live(MAX_NONCE_TTL)
                .max_capacity(MAX_NONCES)
                .build(),
        }
    }
}

#[async_trait]
impl TokenRegistry for InMemoryRegistry {
    async fn register(&self, record: TokenRecord, ttl: Duration) -> Result<(), RegistryError> {
        let now = Instant::now();
        let mut families = self.families.lock().await;
        families.retain(|_, family| family.is_live(now));

        if families.contains_key(&record.family_id) {
            return Err(RegistryError::Conflict(record.family_id));
        }
        let family_id = record.family_id.clone();
        let entry = FamilyEntry {
            current_generation: record.generation,
            revocation_reason: None,
            records: BTreeMap::from([(record.generation, record)]),
            expires_at: now + ttl,
        };
        families.insert(family_id, entry);
        Ok(())
    }

    async fn rotate(
        &self,
        family_id: &str,
        presented_generation: u64,
        presented_fingerprint: &str,
        next: TokenRecord,
        ttl: Duration,
    ) -> Result<RotateOutcome, RegistryError> {
        let now = Instant::now();
        let mut families = self.families.lock().await;
        let Some(family) = families
            .get_mut(family_id)
            .filter(|family| family.is_live(now))
        else {
            return Ok(RotateOutcome::NotFound);
        };

        if family.current_generation != presented_generation {
            return Ok(RotateOutcome::Reused);
        }
        if family.revocation_reason.is_some() {
            return Ok(RotateOutcome::Revoked);
        }
        let Some(current) = family.records.get_mut(&presented_generation) else {
            return Ok(RotateOutcome::NotFound);
        };
        if !current.active || current.fingerprint != presented_fingerprint {
            return Ok(RotateOutcome::Reused);
        }

        current.active = false;
        current.last_used_at = Some(next.created_at);
        family.current_generation = next.generation;
        family.records.insert(next.generation, next);
        family.expires_at = now + ttl;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_family(
        &self,
        family_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, RegistryError> {
        let mut families = self.families.lock().await;
        match families.get_mut(family_id) {
            Some(family) if family.revocation_reason.is_none() => {
                family.revocation_reason = Some(reason.as_str().to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, RegistryError> {
        let families = self.families.lock().await;
        Ok(families
            .get(family_id)
            .is_some_and(|family| family.revocation_reason.is_some()))
    }

    async fn record(
        &self,
        family_id: &str,
        generation: u64,
    ) -> Result<Option<TokenRecord>, RegistryError> {
        let now = Instant::now();
        let families = self.families.lock().await;
        let Some(family) = families.get(family_id).filter(|f| f.is_live(now)) else {
            return Ok(None);
        };
        Ok(family.records.get(&generation).map(|record| {
            let mut record = record.clone();
            if let Some(reason) = &family.revocation_reason {
                record.active = false;
                record.revocation_reason = Some(reason.clone());
            }
            record
        }))
    }

    async fn store_nonce(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let deadline = Instant::now() + ttl.min(MAX_NONCE_TTL);
        let entry = self
            .nonces
            .entry(key.to_string())
            .or_insert((value.to_string(), deadline))
            .await;
        if entry.is_fresh() {
            return Ok(true);
        }
        // A stale entry that moka has not evicted yet does not block the key
        let (_, existing_deadline) = entry.into_value();
        if existing_deadline <= Instant::now() {
            self.nonces
                .insert(key.to_string(), (value.to_string(), deadline))
                .await;
            return Ok(true);
        }
        Ok(false)
    }

    async fn take_nonce(&self, key: &str) -> Result<Option<String>, RegistryError> {
        Ok(self
            .nonces
            .remove(key)
            .await
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value))
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
