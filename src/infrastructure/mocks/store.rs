//! A state store that is always unreachable.

use crate::application::ports::{BucketState, LogAppend, StateStore, StoreError};
use crate::domain::key::ScopeKey;
use std::time::Duration;

/// Fails every operation with `StoreError::Unavailable`.
///
/// Used to exercise failure modes and circuit breaker behavior without a
/// real backing store.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

impl StateStore for UnavailableStore {
    fn incr_window(
        &self,
        _key: &ScopeKey,
        _window_start_ms: u64,
        _ttl: Duration,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn append_log(
        &self,
        _key: &ScopeKey,
        _now_ms: u64,
        _window_ms: u64,
        _limit: u32,
        _ttl: Duration,
    ) -> Result<LogAppend, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn update_bucket(
        &self,
        _key: &ScopeKey,
        _ttl: Duration,
        _update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError> {
        Err(StoreError::Unavailable)
    }
}
