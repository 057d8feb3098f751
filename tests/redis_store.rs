//! Redis store integration tests.
//!
//! These require a running Redis instance at `redis://127.0.0.1:6379` and
//! are ignored by default:
//!
//! ```sh
//! cargo test --features redis-store -- --ignored
//! ```

#![cfg(feature = "redis-store")]

use rategate::infrastructure::mocks::ManualClock;
use rategate::{
    Policy, RateLimiter, RedisStore, RedisStoreConfig, RequestContext, Scope, StateStore,
};
use std::sync::Arc;
use std::time::Duration;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn fresh_store(prefix: &str) -> RedisStore {
    let store = RedisStore::connect_with_config(
        REDIS_URL,
        RedisStoreConfig {
            key_prefix: format!("rategate-test:{}:", prefix),
            ..RedisStoreConfig::default()
        },
    )
    .await
    .expect("redis must be running for ignored integration tests");
    store.clear().await.expect("failed to clear test keys");
    store
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn test_fixed_window_counts_across_limiters() {
    let store = fresh_store("fixed").await;
    let clock = ManualClock::new(1_000_000);
    let policy = Policy::fixed_window("api", 3, Duration::from_secs(60))
        .unwrap()
        .with_scope(Scope::PerIdentity);

    // Two limiters over the same store stand in for two service replicas.
    let a = RateLimiter::new(policy.clone(), store.clone(), Arc::new(clock.clone())).unwrap();
    let b = RateLimiter::new(policy, store, Arc::new(clock.clone())).unwrap();
    let ctx = RequestContext::new().with_identity("alice");

    assert!(a.decide(&ctx).unwrap().allowed);
    assert!(b.decide(&ctx).unwrap().allowed);
    assert!(a.decide(&ctx).unwrap().allowed);
    assert!(b.decide(&ctx).unwrap().throttled());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn test_sliding_window_enforces_limit() {
    let store = fresh_store("sliding").await;
    let clock = ManualClock::new(1_000_000);
    let policy = Policy::sliding_window_log("api", 2, Duration::from_secs(10))
        .unwrap()
        .with_scope(Scope::PerIdentity);
    let limiter = RateLimiter::new(policy, store, Arc::new(clock.clone())).unwrap();
    let ctx = RequestContext::new().with_identity("alice");

    assert!(limiter.decide(&ctx).unwrap().allowed);
    assert!(limiter.decide(&ctx).unwrap().allowed);
    let denied = limiter.decide(&ctx).unwrap();
    assert!(denied.throttled());
    assert_eq!(denied.retry_after, Some(Duration::from_secs(10)));

    clock.advance(Duration::from_secs(11));
    assert!(limiter.decide(&ctx).unwrap().allowed);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn test_token_bucket_survives_concurrent_updates() {
    let store = Arc::new(fresh_store("bucket").await);
    let clock = ManualClock::new(1_000_000);
    let policy = Policy::token_bucket("api", 50, Duration::from_secs(60))
        .unwrap()
        .with_scope(Scope::PerIdentity);
    let limiter = Arc::new(
        RateLimiter::new(policy, Arc::clone(&store), Arc::new(clock.clone())).unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        handles.push(std::thread::spawn(move || {
            let ctx = RequestContext::new().with_identity("alice");
            let mut admitted = 0u32;
            for _ in 0..25 {
                if limiter.decide(&ctx).unwrap().allowed {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // Frozen clock: no refill, so admissions are exactly the burst.
    assert_eq!(total, 50);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn test_window_keys_expire() {
    let store = fresh_store("expiry").await;
    let key = rategate::resolve_key(
        &Policy::fixed_window("api", 1, Duration::from_millis(50)).unwrap(),
        &RequestContext::new(),
    );

    let count = store
        .incr_window(&key, 0, Duration::from_millis(50))
        .unwrap();
    assert_eq!(count, 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    // Same boundary after expiry: the key was dropped and counting restarts.
    let count = store
        .incr_window(&key, 0, Duration::from_millis(50))
        .unwrap();
    assert_eq!(count, 1);
}
