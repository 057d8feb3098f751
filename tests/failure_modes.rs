//! Degraded operation: failure modes and circuit breaking.

use rategate::infrastructure::mocks::{ManualClock, UnavailableStore};
use rategate::{
    BucketState, CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureMode, InMemoryStore,
    LogAppend, Policy, RateLimiter, RequestContext, ScopeKey, StateStore, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delegates to an in-memory store, but can be switched off and counts
/// how often it is reached.
#[derive(Debug)]
struct FlakyStore {
    inner: InMemoryStore,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            down: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl StateStore for FlakyStore {
    fn incr_window(
        &self,
        key: &ScopeKey,
        window_start_ms: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.incr_window(key, window_start_ms, ttl)
    }

    fn append_log(
        &self,
        key: &ScopeKey,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<LogAppend, StoreError> {
        self.check()?;
        self.inner.append_log(key, now_ms, window_ms, limit, ttl)
    }

    fn update_bucket(
        &self,
        key: &ScopeKey,
        ttl: Duration,
        update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError> {
        self.check()?;
        self.inner.update_bucket(key, ttl, update)
    }
}

#[test]
fn test_fail_open_admits_and_marks_degraded() {
    let policy = Policy::token_bucket("api", 5, Duration::from_secs(60))
        .unwrap()
        .with_failure_mode(FailureMode::FailOpen);
    let limiter =
        RateLimiter::new(policy, UnavailableStore, Arc::new(ManualClock::new(0))).unwrap();

    // Far beyond the limit: fail-open admits everything.
    for _ in 0..20 {
        let d = limiter.decide(&RequestContext::new()).unwrap();
        assert!(d.allowed);
        assert!(d.degraded);
    }
}

#[test]
fn test_fail_closed_denies_and_marks_degraded() {
    let policy = Policy::sliding_window_log("api", 5, Duration::from_secs(60))
        .unwrap()
        .with_failure_mode(FailureMode::FailClosed);
    let limiter =
        RateLimiter::new(policy, UnavailableStore, Arc::new(ManualClock::new(0))).unwrap();

    let d = limiter.decide(&RequestContext::new()).unwrap();
    assert!(d.throttled());
    assert!(d.degraded);
    assert_eq!(d.retry_after, Some(Duration::from_secs(60)));
}

#[test]
fn test_open_breaker_stops_store_traffic() {
    let clock = ManualClock::new(0);
    let store = Arc::new(FlakyStore::new());
    let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout_ms: 30_000,
    }));
    let policy = Policy::fixed_window("api", 10, Duration::from_secs(60))
        .unwrap()
        .with_failure_mode(FailureMode::FailOpen);
    let limiter = RateLimiter::new(policy, Arc::clone(&store), Arc::new(clock.clone()))
        .unwrap()
        .with_circuit_breaker(Arc::clone(&breaker));

    store.set_down(true);
    for _ in 0..3 {
        assert!(limiter.decide(&RequestContext::new()).unwrap().degraded);
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    let calls_at_open = store.calls();

    // While open, decisions come from the failure mode alone.
    for _ in 0..5 {
        let d = limiter.decide(&RequestContext::new()).unwrap();
        assert!(d.allowed);
        assert!(d.degraded);
    }
    assert_eq!(store.calls(), calls_at_open);
}

#[test]
fn test_breaker_recovers_after_timeout() {
    let clock = ManualClock::new(0);
    let store = Arc::new(FlakyStore::new());
    let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout_ms: 30_000,
    }));
    let policy = Policy::fixed_window("api", 10, Duration::from_secs(60)).unwrap();
    let limiter = RateLimiter::new(policy, Arc::clone(&store), Arc::new(clock.clone()))
        .unwrap()
        .with_circuit_breaker(Arc::clone(&breaker));
    let ctx = RequestContext::new().with_identity("alice");

    store.set_down(true);
    limiter.decide(&ctx).unwrap();
    limiter.decide(&ctx).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Store comes back; after the recovery timeout one probe goes through
    // and closes the circuit again.
    store.set_down(false);
    clock.advance(Duration::from_secs(31));

    let d = limiter.decide(&ctx).unwrap();
    assert!(d.allowed);
    assert!(!d.degraded);
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Normal counting resumes against real state.
    let d = limiter.decide(&ctx).unwrap();
    assert!(!d.degraded);
    assert_eq!(d.remaining, 8);
}

#[test]
fn test_failed_probe_reopens_the_circuit() {
    let clock = ManualClock::new(0);
    let store = Arc::new(FlakyStore::new());
    let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
        failure_threshold: 2,
        recovery_timeout_ms: 30_000,
    }));
    let policy = Policy::fixed_window("api", 10, Duration::from_secs(60)).unwrap();
    let limiter = RateLimiter::new(policy, Arc::clone(&store), Arc::new(clock.clone()))
        .unwrap()
        .with_circuit_breaker(Arc::clone(&breaker));
    let ctx = RequestContext::new();

    store.set_down(true);
    limiter.decide(&ctx).unwrap();
    limiter.decide(&ctx).unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Store still down: the probe fails and the circuit snaps back open.
    clock.advance(Duration::from_secs(31));
    let d = limiter.decide(&ctx).unwrap();
    assert!(d.degraded);
    assert_eq!(breaker.state(), CircuitState::Open);
}
