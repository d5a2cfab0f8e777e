//! Redis counter store for `quotagate` (companion crate).
//!
//! Counters are plain integer keys with a millisecond expiry, so they can be inspected with
//! `GET`/`PTTL`. The two mutating operations run as Lua scripts, which Redis executes atomically:
//!
//! - `initialize_if_absent` is `SET key value NX PX ttl` followed by a `GET` of the winner's value,
//!   so concurrent first requests from different server instances cannot reset each other.
//! - `decrement` only calls `DECR` when the key still exists. A bare `DECR` on an expired key
//!   would recreate it at -1 with no expiry and lock the identity out forever.
//!
//! ```rust,ignore
//! use quotagate::{QuotaConfig, QuotaLimiter, Subject};
//! use quotagate_redis::RedisCounterStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisCounterStore::connect("redis://127.0.0.1/").await.expect("redis");
//!     let config = QuotaConfig::builder().quota("free", 100).build().unwrap();
//!     let limiter = QuotaLimiter::new(store, config);
//!     let decision = limiter.decide(&Subject::new("alice", "free")).await;
//! }
//! ```

use async_trait::async_trait;
use quotagate::{CounterStore, InitOutcome, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;
use std::time::Duration;

const INITIALIZE_IF_ABSENT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return {1, ARGV[1]}
end
return {0, redis.call('GET', KEYS[1])}
";

const DECREMENT_IF_PRESENT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('DECR', KEYS[1])
end
return false
";

/// Redis-backed [`CounterStore`] shared by every server instance pointing at the same Redis.
///
/// Cloning is cheap; clones share the multiplexed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    initialize: Script,
    decrement: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connection", &"<redis::aio::ConnectionManager>")
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis, e.g. `redis://127.0.0.1/`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection))
    }

    /// Use an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            initialize: Script::new(INITIALIZE_IF_ABSENT),
            decrement: Script::new(DECREMENT_IF_PRESENT),
        }
    }
}

fn unavailable(op: &'static str, key: &str, err: RedisError) -> StoreError {
    tracing::warn!(target: "quotagate_redis", op, key, error = %err, "redis command failed");
    StoreError::unavailable(err)
}

fn parse_counter(key: &str, raw: &str) -> Result<i64, StoreError> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::Corrupt { key: key.to_string(), value: raw.to_string() })
}

/// Interpret a `PTTL` reply: -2 means no key, -1 means no expiry.
fn ttl_from_pttl(key: &str, pttl: i64) -> Result<Duration, StoreError> {
    match pttl {
        -2 => Err(StoreError::KeyMissing(key.to_string())),
        -1 => Err(StoreError::MissingExpiry(key.to_string())),
        millis if millis >= 0 => Ok(Duration::from_millis(millis.unsigned_abs())),
        other => Err(StoreError::Unavailable(format!("unexpected PTTL reply {other} for {key}"))),
    }
}

/// `PX` rejects zero, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let present: bool = conn.exists(key).await.map_err(|e| unavailable("exists", key, e))?;
        Ok(present)
    }

    async fn initialize_if_absent(
        &self,
        key: &str,
        initial: i64,
        ttl: Duration,
    ) -> Result<InitOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let (created, raw): (i64, String) = self
            .initialize
            .key(key)
            .arg(initial)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable("initialize_if_absent", key, e))?;
        Ok(InitOutcome { created: created == 1, value: parse_counter(key, &raw)? })
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<i64> = self
            .decrement
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable("decrement", key, e))?;
        value.ok_or_else(|| StoreError::KeyMissing(key.to_string()))
    }

    async fn read(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await.map_err(|e| unavailable("read", key, e))?;
        match raw {
            Some(raw) => parse_counter(key, &raw),
            None => Err(StoreError::KeyMissing(key.to_string())),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Duration, StoreError> {
        let mut conn = self.connection.clone();
        let pttl: i64 = conn.pttl(key).await.map_err(|e| unavailable("ttl", key, e))?;
        ttl_from_pttl(key, pttl)
    }
}
