//! Shared budgets across replicas via Redis.
//!
//! Requires a running Redis instance. Run with:
//! `cargo run --example redis --features redis-store`

use rategate::{Policy, RateLimiter, RedisStore, RequestContext, Scope, SystemClock};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Distributed Rate Limiting Example ===\n");

    let store = RedisStore::connect("redis://127.0.0.1:6379").await?;

    let policy = Policy::sliding_window_log("api", 5, Duration::from_secs(10))?
        .with_scope(Scope::PerIdentity);

    // Two limiters over the same store behave like two service replicas
    // enforcing one shared budget.
    let replica_a = RateLimiter::new(policy.clone(), store.clone(), Arc::new(SystemClock::new()))?;
    let replica_b = RateLimiter::new(policy, store, Arc::new(SystemClock::new()))?;

    let ctx = RequestContext::new().with_identity("alice");
    for attempt in 1..=8 {
        let replica = if attempt % 2 == 0 { &replica_b } else { &replica_a };
        let name = if attempt % 2 == 0 { "replica-b" } else { "replica-a" };
        let decision = replica.decide(&ctx)?;
        if decision.allowed {
            println!("#{} via {}: allowed ({} remaining)", attempt, name, decision.remaining);
        } else {
            println!(
                "#{} via {}: denied (retry after {:?})",
                attempt,
                name,
                decision.retry_after.unwrap_or_default()
            );
        }
    }

    Ok(())
}
