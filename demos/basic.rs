//! Basic example walking through the three counting algorithms.
//!
//! Run with: `cargo run --example basic`

use rategate::{Algorithm, InMemoryStore, Policy, RateLimiter, RequestContext, Scope, SystemClock};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Basic Rate Limiting Example ===\n");

    for algorithm in [
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::TokenBucket,
    ] {
        let window = Duration::from_secs(60);
        let policy = match algorithm {
            Algorithm::FixedWindow => Policy::fixed_window("demo", 3, window)?,
            Algorithm::SlidingWindowLog => Policy::sliding_window_log("demo", 3, window)?,
            Algorithm::TokenBucket => Policy::token_bucket("demo", 3, window)?,
        }
        .with_scope(Scope::PerIdentity);

        let limiter = RateLimiter::new(
            policy,
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock::new()),
        )?;

        println!("{:?}: 3 requests per minute, 5 attempts", algorithm);
        let ctx = RequestContext::new().with_identity("alice");
        for attempt in 1..=5 {
            let decision = limiter.decide(&ctx)?;
            if decision.allowed {
                println!(
                    "  #{} allowed ({} remaining, resets in {:?})",
                    attempt, decision.remaining, decision.reset_after
                );
            } else {
                println!(
                    "  #{} denied (retry after {:?})",
                    attempt,
                    decision.retry_after.unwrap_or_default()
                );
            }
        }
        println!();
    }

    Ok(())
}
