//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces the application
//! layer needs. Infrastructure adapters implement them: `SystemClock` and
//! `ManualClock` for [`Clock`], `InMemoryStore` and `RedisStore` for
//! [`StateStore`].

use crate::domain::key::ScopeKey;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Port for obtaining current time.
///
/// Time is epoch milliseconds so that decisions made by different processes
/// against a shared store compare the same timestamps. Tests inject a
/// `ManualClock` to drive time deterministically.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Error raised by a state store adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not complete the atomic operation within a bounded
    /// number of attempts or a bounded time. Recovered by the limiter via
    /// the policy's failure mode, never surfaced to callers.
    Unavailable,
    /// Any other adapter failure (corrupt state, protocol error). Surfaced
    /// to the caller as a failure of the decision itself, so it is never
    /// mistaken for a throttling outcome.
    Internal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "state store unavailable"),
            StoreError::Internal(msg) => write!(f, "state store internal error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Result of the sliding window log's atomic trim-check-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogAppend {
    /// Whether the request's timestamp was appended (i.e. admitted).
    pub appended: bool,
    /// Timestamps inside the window after the operation, including the
    /// appended one.
    pub count: u32,
    /// Oldest timestamp still inside the window, if any.
    pub oldest_ms: Option<u64>,
}

/// Token bucket state as held by a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens currently available, in `[0, burst]`.
    pub tokens: f64,
    /// When the bucket was last refilled, epoch milliseconds.
    pub last_refill_ms: u64,
}

/// Port for the key/value substrate holding per-key limiter state.
///
/// Each method is one indivisible operation with respect to other callers on
/// the same key, whether those callers are threads in this process or other
/// processes sharing a distributed store. That atomicity is the limiter's
/// single serialization point: the strategies never read, compare, and write
/// in separate steps.
///
/// Every operation carries a `ttl` after which an untouched key may be
/// dropped; this bounds memory for high-cardinality scopes such as
/// anonymous IPs.
pub trait StateStore: Send + Sync + Debug {
    /// Increment the counter for the window starting at `window_start_ms`,
    /// creating it at zero first if this is the window's first request, and
    /// return the post-increment count.
    ///
    /// Opening a new window and counting its first request is one atomic
    /// step: two racing requests can never both observe a fresh window. The
    /// key's expiry is set only when the window is created, never extended
    /// by later increments.
    fn incr_window(
        &self,
        key: &ScopeKey,
        window_start_ms: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    /// Atomically drop timestamps older than `now_ms - window_ms`, then
    /// append `now_ms` if fewer than `limit` remain.
    ///
    /// On denial nothing is appended; the returned `oldest_ms` lets the
    /// caller compute when capacity next frees up.
    fn append_log(
        &self,
        key: &ScopeKey,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<LogAppend, StoreError>;

    /// Atomically read, transform, and write back the token bucket for
    /// `key`, returning the stored state.
    ///
    /// `update` receives `None` when no bucket exists and must return the
    /// state to store. The whole read-modify-write cycle is indivisible
    /// with respect to other callers on the same key; distributed adapters
    /// may invoke `update` more than once while retrying an optimistic
    /// write, so it must be free of side effects other than its result.
    fn update_bucket(
        &self,
        key: &ScopeKey,
        ttl: Duration,
        update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn incr_window(
        &self,
        key: &ScopeKey,
        window_start_ms: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        (**self).incr_window(key, window_start_ms, ttl)
    }

    fn append_log(
        &self,
        key: &ScopeKey,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<LogAppend, StoreError> {
        (**self).append_log(key, now_ms, window_ms, limit, ttl)
    }

    fn update_bucket(
        &self,
        key: &ScopeKey,
        ttl: Duration,
        update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError> {
        (**self).update_bucket(key, ttl, update)
    }
}
