use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult, Script};
use std::{collections::HashMap, future::Future, time::Duration};
use tracing::{info, warn};

use crate::{
    config::StoreSettings,
    error::{RespectfulError, Result},
    realm::{Realm, MAX_TIMESPAN},
    store::{RealmStore, UsageSnapshot},
    utils::{ttl_from_millis, KeyLayout},
};

/// Register a batch of realms unless any of them exists.
///
/// KEYS[1] is the realm set, KEYS[2..] the realm hashes. ARGV holds
/// (name, max_requests, timespan, safety_threshold) per realm. Returns the
/// 1-based index of the first existing realm, or 0 once everything is written.
const INSERT_REALMS_SCRIPT: &str = r#"
for i = 2, #KEYS do
    if redis.call("EXISTS", KEYS[i]) == 1 then
        return i - 1
    end
end

for i = 2, #KEYS do
    local base = (i - 2) * 4
    redis.call("HSET", KEYS[i],
        "max_requests", ARGV[base + 2],
        "timespan", ARGV[base + 3],
        "safety_threshold", ARGV[base + 4])
    redis.call("SADD", KEYS[1], ARGV[base + 1])
end

return 0
"#;

const UPDATE_REALM_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
    return 0
end

redis.call("HSET", KEYS[1], "max_requests", ARGV[1], "timespan", ARGV[2])
return 1
"#;

/// Increment a usage counter, arming its expiry only when it has none.
///
/// Returns {count, remaining ttl in ms}.
const INCREMENT_USAGE_SCRIPT: &str = r#"
local count = redis.call("INCR", KEYS[1])
local ttl = redis.call("PTTL", KEYS[1])

if ttl < 0 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end

return {count, ttl}
"#;

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            key_prefix: "respectful".to_string(),
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&StoreSettings> for RedisConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            url: settings.url(),
            key_prefix: settings.key_prefix.clone(),
            connection_timeout: settings.connection_timeout(),
            command_timeout: settings.command_timeout(),
        }
    }
}

/// Realm store backed by a shared Redis instance
pub struct RedisStore {
    connection: ConnectionManager,
    keys: KeyLayout,
    command_timeout: Duration,
    insert_realms: Script,
    update_realm: Script,
    increment_usage: Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            RespectfulError::StoreUnavailable(e)
        })?;

        let connection =
            match tokio::time::timeout(config.connection_timeout, client.get_connection_manager())
                .await
            {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    warn!("Failed to create connection manager: {}", e);
                    return Err(RespectfulError::StoreUnavailable(e));
                }
                Err(_) => {
                    warn!(
                        "Timeout while creating connection manager ({}s)",
                        config.connection_timeout.as_secs()
                    );
                    return Err(timeout_error("connect"));
                }
            };

        let store = Self {
            connection,
            keys: KeyLayout::new(config.key_prefix),
            command_timeout: config.command_timeout,
            insert_realms: Script::new(INSERT_REALMS_SCRIPT),
            update_realm: Script::new(UPDATE_REALM_SCRIPT),
            increment_usage: Script::new(INCREMENT_USAGE_SCRIPT),
        };

        store.health_check().await.map_err(|e| {
            warn!("Redis PING failed: {}", e);
            e
        })?;

        info!("Redis store initialized successfully");
        Ok(store)
    }

    /// Run one store command under the command timeout
    async fn run<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(operation, "Redis command timed out");
                Err(timeout_error(operation))
            }
        }
    }
}

/// Expiry argument for the increment script. Checked before the script runs,
/// since a rejected `PEXPIRE` would leave the counter incremented with no TTL.
fn window_millis(name: &str, window: Duration) -> Result<u64> {
    u64::try_from(window.as_millis())
        .ok()
        .filter(|&millis| millis > 0 && millis <= MAX_TIMESPAN * 1000)
        .ok_or_else(|| {
            RespectfulError::Validation(format!(
                "realm '{}': window of {}s cannot be scheduled",
                name,
                window.as_secs()
            ))
        })
}

fn timeout_error(operation: &'static str) -> RespectfulError {
    RespectfulError::StoreUnavailable(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "Redis operation timed out",
        operation.to_string(),
    )))
}

fn parse_field(realm: &str, fields: &HashMap<String, String>, field: &str) -> Result<u64> {
    let raw = fields.get(field).ok_or_else(|| RespectfulError::CorruptRealm {
        realm: realm.to_string(),
        reason: format!("missing field '{}'", field),
    })?;

    raw.parse().map_err(|_| RespectfulError::CorruptRealm {
        realm: realm.to_string(),
        reason: format!("field '{}' is not an unsigned integer: {:?}", field, raw),
    })
}

#[async_trait]
impl RealmStore for RedisStore {
    async fn insert_realms(&self, realms: &[Realm]) -> Result<Option<String>> {
        if realms.is_empty() {
            return Ok(None);
        }

        let mut conn = self.connection.clone();
        let mut invocation = self.insert_realms.prepare_invoke();
        invocation.key(self.keys.realms_key());

        for realm in realms {
            invocation
                .key(self.keys.realm_key(&realm.name))
                .arg(&realm.name)
                .arg(realm.max_requests)
                .arg(realm.timespan)
                .arg(realm.safety_threshold);
        }

        let existing: usize = self
            .run("insert_realms", invocation.invoke_async(&mut conn))
            .await?;

        Ok(existing
            .checked_sub(1)
            .and_then(|index| realms.get(index))
            .map(|realm| realm.name.clone()))
    }

    async fn update_realm(&self, name: &str, max_requests: u64, timespan: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let mut invocation = self.update_realm.key(self.keys.realm_key(name));
        invocation.arg(max_requests).arg(timespan);

        let updated: i64 = self
            .run("update_realm", invocation.invoke_async(&mut conn))
            .await?;
        Ok(updated == 1)
    }

    async fn fetch_realm(&self, name: &str) -> Result<Option<Realm>> {
        let mut conn = self.connection.clone();
        let key = self.keys.realm_key(name);

        let fields: HashMap<String, String> =
            self.run("fetch_realm", conn.hgetall(&key)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(Realm {
            name: name.to_string(),
            max_requests: parse_field(name, &fields, "max_requests")?,
            timespan: parse_field(name, &fields, "timespan")?,
            safety_threshold: parse_field(name, &fields, "safety_threshold")?,
        }))
    }

    async fn realm_names(&self) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let key = self.keys.realms_key();
        self.run("realm_names", conn.smembers(&key)).await
    }

    async fn remove_realms(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for name in names {
            pipe.del(self.keys.realm_key(name))
                .ignore()
                .del(self.keys.usage_key(name))
                .ignore()
                .srem(self.keys.realms_key(), name)
                .ignore();
        }

        self.run("remove_realms", pipe.query_async::<_, ()>(&mut conn))
            .await
    }

    async fn increment_usage(&self, name: &str, window: Duration) -> Result<UsageSnapshot> {
        let mut conn = self.connection.clone();
        let mut invocation = self.increment_usage.key(self.keys.usage_key(name));
        invocation.arg(window_millis(name, window)?);

        let (count, pttl): (u64, i64) = self
            .run("increment_usage", invocation.invoke_async(&mut conn))
            .await?;

        Ok(UsageSnapshot {
            count,
            ttl: ttl_from_millis(pttl),
        })
    }

    async fn usage(&self, name: &str) -> Result<UsageSnapshot> {
        let mut conn = self.connection.clone();
        let key = self.keys.usage_key(name);

        let (count, pttl): (Option<u64>, i64) = self
            .run(
                "usage",
                redis::pipe()
                    .get(&key)
                    .cmd("PTTL")
                    .arg(&key)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(UsageSnapshot {
            count: count.unwrap_or(0),
            ttl: ttl_from_millis(pttl),
        })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        self.run(
            "ping",
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await
    }
}
