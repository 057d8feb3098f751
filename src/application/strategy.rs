//! The three decision algorithms.
//!
//! Each strategy implements the same contract: given a scope key, the
//! effective limit, and the current time, perform exactly one atomic
//! operation against the state store and return a [`Decision`]. No strategy
//! sleeps, spins, or retries; a denial always carries the computed wait
//! time and leaves the choice of what to do with it to the caller.
//!
//! The strategies share no state. The policy's `algorithm` tag selects one
//! at decision time.

use crate::application::ports::{BucketState, StateStore, StoreError};
use crate::domain::decision::Decision;
use crate::domain::key::ScopeKey;
use crate::domain::policy::{Algorithm, Policy};
use std::cell::Cell;
use std::time::Duration;

/// Slack applied to token comparisons so that a wait computed from the
/// refill rate is sufficient despite floating point rounding.
const TOKEN_EPSILON: f64 = 1e-9;

/// Run the policy's algorithm for one request.
///
/// `limit` and `burst` are the effective values after any dynamic override;
/// they default to the policy's own.
pub(crate) fn decide(
    policy: &Policy,
    limit: u32,
    burst: u32,
    key: &ScopeKey,
    store: &dyn StateStore,
    now_ms: u64,
) -> Result<Decision, StoreError> {
    match policy.algorithm() {
        Algorithm::FixedWindow => fixed_window(policy, limit, key, store, now_ms),
        Algorithm::SlidingWindowLog => sliding_window_log(policy, limit, key, store, now_ms),
        Algorithm::TokenBucket => token_bucket(policy, limit, burst, key, store, now_ms),
    }
}

/// Fixed window: one counter per aligned window.
///
/// The counter for a new window is created and incremented in a single
/// atomic store operation, so two requests racing across a boundary can
/// never both observe a fresh window.
fn fixed_window(
    policy: &Policy,
    limit: u32,
    key: &ScopeKey,
    store: &dyn StateStore,
    now_ms: u64,
) -> Result<Decision, StoreError> {
    let window_ms = policy.window_millis();
    let window_start = now_ms - now_ms % window_ms;
    let count = store.incr_window(key, window_start, policy.window())?;

    let reset_after = Duration::from_millis(window_start + window_ms - now_ms);
    if count <= u64::from(limit) {
        let remaining = limit.saturating_sub(count as u32);
        Ok(Decision::allow(limit, remaining, reset_after))
    } else {
        Ok(Decision::deny(limit, reset_after, reset_after))
    }
}

/// Sliding window log: exact bound over any trailing window.
///
/// The store trims expired timestamps, checks the count, and appends the
/// new one inside a single atomic section. A denial appends nothing.
fn sliding_window_log(
    policy: &Policy,
    limit: u32,
    key: &ScopeKey,
    store: &dyn StateStore,
    now_ms: u64,
) -> Result<Decision, StoreError> {
    let window_ms = policy.window_millis();
    let log = store.append_log(key, now_ms, window_ms, limit, policy.window())?;

    // When the oldest entry leaves the window, one slot frees up.
    let until_oldest_expires = log
        .oldest_ms
        .map(|oldest| Duration::from_millis((oldest + window_ms).saturating_sub(now_ms)))
        .unwrap_or_else(|| policy.window());

    if log.appended {
        Ok(Decision::allow(
            limit,
            limit.saturating_sub(log.count),
            until_oldest_expires,
        ))
    } else {
        Ok(Decision::deny(limit, until_oldest_expires, until_oldest_expires))
    }
}

/// Token bucket: lazy refill, one token per request.
///
/// The refill is computed inside the store's read-modify-write closure so
/// that refill and consumption are one indivisible transition. An absent
/// bucket starts full, so the entry's TTL must cover the time an empty
/// bucket needs to refill completely (`window * burst / limit`); evicting
/// earlier would hand a drained bucket unearned tokens on recreation.
fn token_bucket(
    policy: &Policy,
    limit: u32,
    burst: u32,
    key: &ScopeKey,
    store: &dyn StateStore,
    now_ms: u64,
) -> Result<Decision, StoreError> {
    let window_ms = policy.window_millis() as f64;
    let rate = f64::from(limit) / window_ms; // tokens per millisecond
    let capacity = f64::from(burst);

    let refill_span_ms = u64::from(burst)
        .saturating_mul(policy.window_millis())
        .saturating_add(u64::from(limit) - 1)
        / u64::from(limit);
    let ttl = Duration::from_millis(refill_span_ms.max(1));

    // The closure may run more than once under optimistic concurrency; the
    // cell records the outcome of the invocation that actually committed.
    let consumed = Cell::new(false);
    let state = store.update_bucket(key, ttl, &|previous| {
        let prev = previous.unwrap_or(BucketState {
            tokens: capacity,
            last_refill_ms: now_ms,
        });
        let elapsed = now_ms.saturating_sub(prev.last_refill_ms) as f64;
        let mut tokens = (prev.tokens + elapsed * rate).min(capacity);

        if tokens + TOKEN_EPSILON >= 1.0 {
            tokens = (tokens - 1.0).max(0.0);
            consumed.set(true);
        } else {
            consumed.set(false);
        }

        BucketState {
            tokens,
            last_refill_ms: now_ms,
        }
    })?;

    let until_full = Duration::from_millis(((capacity - state.tokens) / rate).ceil() as u64);
    if consumed.get() {
        Ok(Decision::allow(limit, state.tokens.floor() as u32, until_full))
    } else {
        let wait_ms = ((1.0 - state.tokens) / rate).ceil() as u64;
        Ok(Decision::deny(limit, until_full, Duration::from_millis(wait_ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryStore;
    use std::time::Duration;

    fn key(policy: &Policy) -> ScopeKey {
        crate::domain::key::resolve_key(policy, &crate::domain::key::RequestContext::new())
    }

    fn run(policy: &Policy, store: &InMemoryStore, now_ms: u64) -> Decision {
        decide(
            policy,
            policy.limit(),
            policy.burst(),
            &key(policy),
            store,
            now_ms,
        )
        .unwrap()
    }

    #[test]
    fn test_fixed_window_allows_up_to_limit() {
        let policy = Policy::fixed_window("api", 3, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        for expected_remaining in [2, 1, 0] {
            let d = run(&policy, &store, 1_000);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let d = run(&policy, &store, 1_000);
        assert!(d.throttled());
        assert_eq!(d.retry_after, Some(Duration::from_millis(9_000)));
    }

    #[test]
    fn test_fixed_window_resets_at_boundary() {
        let policy = Policy::fixed_window("api", 1, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&policy, &store, 1_000).allowed);
        assert!(run(&policy, &store, 9_999).throttled());
        // New window, fresh counter.
        assert!(run(&policy, &store, 10_000).allowed);
    }

    #[test]
    fn test_fixed_window_boundary_burst_is_2x() {
        // Documented behavior: limit at the end of one window plus limit at
        // the start of the next can land within a short span.
        let policy = Policy::fixed_window("api", 5, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        let mut admitted = 0;
        for _ in 0..5 {
            if run(&policy, &store, 9_999).allowed {
                admitted += 1;
            }
        }
        for _ in 0..5 {
            if run(&policy, &store, 10_001).allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_sliding_window_enforces_trailing_bound() {
        let policy = Policy::sliding_window_log("api", 2, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&policy, &store, 9_000).allowed);
        assert!(run(&policy, &store, 9_999).allowed);
        // Unlike the fixed window, crossing the aligned boundary frees nothing.
        assert!(run(&policy, &store, 10_001).throttled());
        // The first entry expires 10s after it was logged.
        assert!(run(&policy, &store, 19_001).allowed);
    }

    #[test]
    fn test_sliding_window_denial_reports_wait_until_oldest_expires() {
        let policy = Policy::sliding_window_log("api", 1, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&policy, &store, 1_000).allowed);
        let d = run(&policy, &store, 4_000);
        assert!(d.throttled());
        assert_eq!(d.retry_after, Some(Duration::from_millis(7_000)));
    }

    #[test]
    fn test_sliding_window_denial_appends_nothing() {
        let policy = Policy::sliding_window_log("api", 1, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&policy, &store, 1_000).allowed);
        for t in [2_000, 3_000, 4_000] {
            assert!(run(&policy, &store, t).throttled());
        }
        // Denied attempts did not extend the budget's occupancy.
        assert!(run(&policy, &store, 11_001).allowed);
    }

    #[test]
    fn test_token_bucket_burst_then_denial() {
        let policy = Policy::token_bucket("api", 10, Duration::from_secs(10))
            .unwrap()
            .with_burst(3)
            .unwrap();
        let store = InMemoryStore::new();

        for _ in 0..3 {
            assert!(run(&policy, &store, 5_000).allowed);
        }
        let d = run(&policy, &store, 5_000);
        assert!(d.throttled());
        // One token accrues every window/limit = 1s.
        assert_eq!(d.retry_after, Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_token_bucket_steady_rate_never_denies() {
        let policy = Policy::token_bucket("api", 10, Duration::from_secs(10)).unwrap();
        let store = InMemoryStore::new();

        // Drain the initial burst, then pace requests at exactly one per
        // refill interval.
        let mut now = 0;
        for _ in 0..10 {
            assert!(run(&policy, &store, now).allowed);
        }
        for _ in 0..100 {
            now += 1_000;
            assert!(run(&policy, &store, now).allowed);
        }
    }

    #[test]
    fn test_token_bucket_saturates_after_idle() {
        let policy = Policy::token_bucket("api", 2, Duration::from_secs(1)).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&policy, &store, 0).allowed);
        assert!(run(&policy, &store, 0).allowed);
        assert!(run(&policy, &store, 0).throttled());

        // An arbitrarily long idle gap refills to burst capacity, not beyond.
        let later = 3_600_000;
        assert!(run(&policy, &store, later).allowed);
        assert!(run(&policy, &store, later).allowed);
        assert!(run(&policy, &store, later).throttled());
    }

    #[test]
    fn test_token_bucket_ttl_covers_refill_from_empty() {
        // burst > limit: a drained bucket earns back only limit tokens per
        // window, so its entry must outlive sweeps until a full refill.
        let policy = Policy::token_bucket("api", 2, Duration::from_secs(10))
            .unwrap()
            .with_burst(4)
            .unwrap();
        let store = InMemoryStore::new();

        for _ in 0..4 {
            assert!(run(&policy, &store, 0).allowed);
        }
        assert!(run(&policy, &store, 0).throttled());

        // One idle window earns 2 of 4 tokens; the entry must survive.
        assert_eq!(store.sweep(10_001), 0);
        let mut admitted = 0;
        for _ in 0..4 {
            if run(&policy, &store, 10_001).allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);

        // Once a full refill span has passed untouched, the entry may go.
        assert_eq!(store.sweep(40_001), 1);
    }

    #[test]
    fn test_token_bucket_remaining_reflects_floor() {
        let policy = Policy::token_bucket("api", 4, Duration::from_secs(4)).unwrap();
        let store = InMemoryStore::new();

        let d = run(&policy, &store, 0);
        assert!(d.allowed);
        assert_eq!(d.remaining, 3);

        // Half a refill interval later: 3.5 tokens before consumption.
        let d = run(&policy, &store, 500);
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
    }

    #[test]
    fn test_strategies_do_not_share_state() {
        let window = Duration::from_secs(10);
        let fixed = Policy::fixed_window("fixed", 1, window).unwrap();
        let bucket = Policy::token_bucket("bucket", 1, window).unwrap();
        let store = InMemoryStore::new();

        assert!(run(&fixed, &store, 0).allowed);
        assert!(run(&fixed, &store, 0).throttled());
        // Exhausting one policy's budget leaves the other untouched.
        assert!(run(&bucket, &store, 0).allowed);
    }
}
