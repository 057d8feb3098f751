//! Redis-backed state store.
//!
//! Lets every process of a horizontally scaled service share one set of
//! budgets. Each primitive of the [`StateStore`] port maps onto an atomic
//! Redis-side operation:
//!
//! - Fixed window: a counter key per `(scope key, window boundary)` pair,
//!   incremented by a Lua script that sets the expiry only when the
//!   increment created the key. Continuous traffic therefore never extends
//!   a window, and opening a window and counting its first request is one
//!   server-side step.
//! - Sliding window log: a sorted set of timestamps, trimmed, checked and
//!   conditionally appended inside one Lua script.
//! - Token bucket: a hash of `{tokens, last refill, version}` updated
//!   optimistically; the write commits only if the version is unchanged,
//!   retrying a bounded number of times before reporting the store
//!   unavailable.
//!
//! Connections go through `redis::aio::ConnectionManager`, which
//! reconnects on failure. The `StateStore` port is synchronous, so the
//! adapter bridges onto the current tokio runtime when one exists and a
//! throwaway runtime otherwise.

use crate::application::ports::{BucketState, LogAppend, StateStore, StoreError};
use crate::domain::key::ScopeKey;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

const APPEND_LOG_SCRIPT: &str = r#"
local horizon = tonumber(ARGV[1]) - tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. horizon)
local count = redis.call('ZCARD', KEYS[1])
local appended = 0
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
    count = count + 1
    appended = 1
end
redis.call('PEXPIRE', KEYS[1], ARGV[5])
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if oldest[2] == nil then
    return {appended, count, -1}
end
return {appended, count, tonumber(oldest[2])}
"#;

const CAS_BUCKET_SCRIPT: &str = r#"
local ver = redis.call('HGET', KEYS[1], 'ver')
if ver == false then
    ver = '0'
end
if ver ~= ARGV[1] then
    return 0
end
redis.call('HSET', KEYS[1], 'tok', ARGV[2], 'ts', ARGV[3], 'ver', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return 1
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix for every key this store writes (default: `"rategate:"`).
    pub key_prefix: String,
    /// Attempts for the token bucket's optimistic update before the store
    /// reports itself unavailable (default: 4).
    pub max_cas_attempts: u32,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rategate:".to_string(),
            max_cas_attempts: 4,
        }
    }
}

/// Distributed state store backed by Redis.
///
/// The synchronous [`StateStore`] methods bridge onto the ambient tokio
/// runtime via `block_in_place`, which requires the multi-thread runtime
/// flavor; calling them on a current-thread runtime panics. Outside any
/// runtime they run on a private single-use runtime instead.
pub struct RedisStore {
    connection: Arc<RwLock<ConnectionManager>>,
    config: RedisStoreConfig,
    /// Disambiguates log members appended within the same millisecond.
    member_seq: AtomicU64,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
            member_seq: AtomicU64::new(0),
        }
    }
}

impl RedisStore {
    /// Connect with default configuration.
    ///
    /// # Errors
    /// Returns the underlying error if the connection cannot be
    /// established.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect with custom configuration.
    ///
    /// # Errors
    /// Returns the underlying error if the connection cannot be
    /// established.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            config,
            member_seq: AtomicU64::new(0),
        })
    }

    /// Delete every key carrying this store's prefix. Intended for tests.
    pub async fn clear(&self) -> Result<(), RedisError> {
        let pattern = format!("{}*", self.config.key_prefix);
        let mut conn = self.connection.write().await;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            if !keys.is_empty() {
                let _: () = redis::cmd("DEL").arg(&keys).query_async(&mut *conn).await?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }

    fn redis_key(&self, key: &ScopeKey) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run an async store operation from the synchronous port.
    fn block_on<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(fut))
        } else {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StoreError::Internal(format!("failed to build runtime: {}", e)))?;
            runtime.block_on(fut)
        }
    }

    async fn read_bucket(&self, key: &str) -> Result<(Option<BucketState>, u64), StoreError> {
        let mut conn = self.connection.write().await;
        let (tokens, last_refill_ms, version): (Option<String>, Option<u64>, Option<u64>) =
            redis::cmd("HMGET")
                .arg(key)
                .arg("tok")
                .arg("ts")
                .arg("ver")
                .query_async(&mut *conn)
                .await
                .map_err(classify)?;

        match (tokens, last_refill_ms) {
            (Some(tokens), Some(last_refill_ms)) => {
                let tokens = tokens.parse::<f64>().map_err(|_| {
                    StoreError::Internal(format!("corrupt token count for {}", key))
                })?;
                Ok((
                    Some(BucketState {
                        tokens,
                        last_refill_ms,
                    }),
                    version.unwrap_or(0),
                ))
            }
            _ => Ok((None, 0)),
        }
    }
}

impl StateStore for RedisStore {
    fn incr_window(
        &self,
        key: &ScopeKey,
        window_start_ms: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        // The boundary is part of the key: a new window is a new key, so a
        // reset can never race with an increment, and the old window's key
        // simply expires.
        let redis_key = format!("{}\u{1f}{}", self.redis_key(key), window_start_ms);
        let ttl_ms = ttl_millis(ttl);

        self.block_on(async {
            let mut conn = self.connection.write().await;
            Script::new(INCR_WINDOW_SCRIPT)
                .key(&redis_key)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(classify)
        })
    }

    fn append_log(
        &self,
        key: &ScopeKey,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<LogAppend, StoreError> {
        let redis_key = self.redis_key(key);
        let ttl_ms = ttl_millis(ttl);
        let member = format!(
            "{}-{}-{}",
            now_ms,
            std::process::id(),
            self.member_seq.fetch_add(1, Ordering::Relaxed)
        );

        let (appended, count, oldest): (i64, i64, i64) = self.block_on(async {
            let mut conn = self.connection.write().await;
            Script::new(APPEND_LOG_SCRIPT)
                .key(&redis_key)
                .arg(now_ms)
                .arg(window_ms)
                .arg(limit)
                .arg(&member)
                .arg(ttl_ms)
                .invoke_async(&mut *conn)
                .await
                .map_err(classify)
        })?;

        Ok(LogAppend {
            appended: appended == 1,
            count: u32::try_from(count).unwrap_or(u32::MAX),
            oldest_ms: u64::try_from(oldest).ok(),
        })
    }

    fn update_bucket(
        &self,
        key: &ScopeKey,
        ttl: Duration,
        update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError> {
        let redis_key = self.redis_key(key);
        let ttl_ms = ttl_millis(ttl);

        self.block_on(async {
            for _ in 0..self.config.max_cas_attempts {
                let (previous, version) = self.read_bucket(&redis_key).await?;
                let next = update(previous);

                let mut conn = self.connection.write().await;
                let committed: i64 = Script::new(CAS_BUCKET_SCRIPT)
                    .key(&redis_key)
                    .arg(version)
                    .arg(next.tokens)
                    .arg(next.last_refill_ms)
                    .arg(version + 1)
                    .arg(ttl_ms)
                    .invoke_async(&mut *conn)
                    .await
                    .map_err(classify)?;
                drop(conn);

                if committed == 1 {
                    return Ok(next);
                }
                // Version moved under us; re-read and try again.
            }

            tracing::warn!(
                key = %redis_key,
                attempts = self.config.max_cas_attempts,
                "token bucket update exhausted its optimistic retries"
            );
            Err(StoreError::Unavailable)
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Split adapter failures into "store unreachable" (absorbed by the
/// limiter's failure mode) and everything else (surfaced to the caller).
fn classify(error: RedisError) -> StoreError {
    if error.is_io_error()
        || error.is_timeout()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
    {
        tracing::warn!(error = %error, "redis unreachable");
        StoreError::Unavailable
    } else {
        StoreError::Internal(error.to_string())
    }
}
