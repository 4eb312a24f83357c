use super::{RegistryError, RevocationReason, RotateOutcome, TokenRecord, TokenRegistry};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

const KEY_PREFIX: &str = "auth";

/// KEYS: family hash, record. ARGV: subject, generation, record json, ttl
const REGISTER_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], 'subject', ARGV[1], 'current_generation', ARGV[2], 'revoked', '0')
redis.call('EXPIRE', KEYS[1], ARGV[4])
redis.call('SET', KEYS[2], ARGV[3], 'EX', ARGV[4])
return 1
";

/// KEYS: family hash, presented record, next record.
/// ARGV: presented generation, fingerprint, next generation, next json, ttl, used_at
const ROTATE_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'current_generation')
if not current then return -1 end
if current ~= ARGV[1] then return -3 end
if redis.call('HGET', KEYS[1], 'revoked') == '1' then return -2 end
local raw = redis.call('GET', KEYS[2])
if not raw then return -1 end
local record = cjson.decode(raw)
if record['fingerprint'] ~= ARGV[2] or record['active'] ~= true then return -3 end
record['active'] = false
record['last_used_at'] = tonumber(ARGV[6])
redis.call('SET', KEYS[2], cjson.encode(record), 'KEEPTTL')
redis.call('SET', KEYS[3], ARGV[4], 'EX', ARGV[5])
redis.call('HSET', KEYS[1], 'current_generation', ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[5])
return 1
";

/// KEYS: family hash. ARGV: reason
const REVOKE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
if redis.call('HGET', KEYS[1], 'revoked') == '1' then return 0 end
redis.call('HSET', KEYS[1], 'revoked', '1', 'revocation_reason', ARGV[1])
return 1
";

#[derive(Clone)]
struct Scripts {
    register: Script,
    rotate: Script,
    revoke: Script,
}

/// Registry shared by every instance through Redis. Rotation and
/// revocation run as Lua scripts, so they are atomic across processes.
#[derive(Clone)]
pub struct RedisRegistry {
    _client: Client,
    conn_manager: ConnectionManager,
    scripts: Scripts,
}

fn family_key(family_id: &str) -> String {
    format!("{KEY_PREFIX}:family:{family_id}")
}

fn record_key(family_id: &str, generation: u64) -> String {
    format!("{KEY_PREFIX}:token:{family_id}:{generation}")
}

fn nonce_key(key: &str) -> String {
    format!("{KEY_PREFIX}:nonce:{key}")
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisRegistry {
    /// Connect and verify the connection with a PING
    pub async fn new(redis_url: &str) -> Result<Self, RegistryError> {
        let client = Client::open(redis_url)
            .map_err(|err| RegistryError::Config(format!("Invalid Redis URL: {err}")))?;
        let conn_manager = ConnectionManager::new(client.clone()).await?;

        let mut conn = conn_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self {
            _client: client,
            conn_manager,
            scripts: Scripts {
                register: Script::new(REGISTER_SCRIPT),
                rotate: Script::new(ROTATE_SCRIPT),
                revoke: Script::new(REVOKE_SCRIPT),
            },
        })
    }
}

#[async_trait]
impl TokenRegistry for RedisRegistry {
    async fn register(&self, record: TokenRecord, ttl: Duration) -> Result<(), RegistryError> {
        let serialized = serde_json::to_string(&record)?;
        let mut conn = self.conn_manager.clone();

        let mut invocation = self.scripts.register.prepare_invoke();
        invocation
            .key(family_key(&record.family_id))
            .key(record_key(&record.family_id, record.generation))
            .arg(&record.subject)
            .arg(record.generation)
            .arg(serialized)
            .arg(ttl_secs(ttl));
        let created: i64 = invocation.invoke_async(&mut conn).await.map_err(|err| {
            error!("Redis error while registering family {}: {}", record.family_id, err);
            RegistryError::from(err)
        })?;

        if created == 0 {
            return Err(RegistryError::Conflict(record.family_id));
        }
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
        let serialized = serde_json::to_string(&next)?;
        let mut conn = self.conn_manager.clone();

        let mut invocation = self.scripts.rotate.prepare_invoke();
        invocation
            .key(family_key(family_id))
            .key(record_key(family_id, presented_generation))
            .key(record_key(family_id, next.generation))
            .arg(presented_generation)
            .arg(presented_fingerprint)
            .arg(next.generation)
            .arg(serialized)
            .arg(ttl_secs(ttl))
            .arg(next.created_at);
        let outcome: i64 = invocation.invoke_async(&mut conn).await.map_err(|err| {
            error!("Redis error while rotating family {}: {}", family_id, err);
            RegistryError::from(err)
        })?;

        Ok(match outcome {
            1 => RotateOutcome::Rotated,
            -2 => RotateOutcome::Revoked,
            -3 => RotateOutcome::Reused,
            _ => RotateOutcome::NotFound,
        })
    }

    async fn revoke_family(
        &self,
        family_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn_manager.clone();
        let mut invocation = self.scripts.revoke.prepare_invoke();
        invocation.key(family_key(family_id)).arg(reason.as_str());
        let revoked: i64 = invocation.invoke_async(&mut conn).await.map_err(|err| {
            error!("Redis error while revoking family {}: {}", family_id, err);
            RegistryError::from(err)
        })?;
        Ok(revoked == 1)
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, RegistryError> {
        let mut conn = self.conn_manager.clone();
        let revoked: Option<String> = conn.hget(family_key(family_id), "revoked").await?;
        Ok(revoked.as_deref() == Some("1"))
    }

    async fn record(
        &self,
        family_id: &str,
        generation: u64,
    ) -> Result<Option<TokenRecord>, RegistryError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(record_key(family_id, generation)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut record: TokenRecord = serde_json::from_str(&raw)?;

        let family: HashMap<String, String> = conn.hgetall(family_key(family_id)).await?;
        if family.get("revoked").map(String::as_str) == Some("1") {
            record.active = false;
            record.revocation_reason = family.get("revocation_reason").cloned();
        }
        Ok(Some(record))
    }

    async fn store_nonce(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn_manager.clone();
        let stored: Option<String> = redis::cmd("SET")
            .arg(nonce_key(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(stored.is_some())
    }

    async fn take_nonce(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(nonce_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}
