//! Dynamic per-tier limits through a rate resolver.
//!
//! Run with: `cargo run --example tiers`

use rategate::{
    InMemoryStore, Policy, RateLimiter, RateOverride, RateResolver, RequestContext, Scope,
    SystemClock,
};
use std::sync::Arc;
use std::time::Duration;

/// Maps subscription tiers onto limits at decision time.
struct TierResolver;

impl RateResolver for TierResolver {
    fn resolve(&self, ctx: &RequestContext) -> Option<RateOverride> {
        match ctx.tier() {
            Some("enterprise") => Some(RateOverride::Unlimited),
            Some("pro") => Some(RateOverride::Limit(10)),
            _ => None, // free tier keeps the policy's static limit
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Tiered Limits Example ===\n");

    let policy = Policy::fixed_window("api", 3, Duration::from_secs(60))?
        .with_scope(Scope::PerIdentity);
    let limiter = RateLimiter::new(
        policy,
        Arc::new(InMemoryStore::new()),
        Arc::new(SystemClock::new()),
    )?
    .with_rate_resolver(Arc::new(TierResolver));

    for (user, tier) in [
        ("fred", "free"),
        ("paula", "pro"),
        ("erin", "enterprise"),
    ] {
        let ctx = RequestContext::new().with_identity(user).with_tier(tier);
        let mut admitted = 0;
        for _ in 0..20 {
            if limiter.decide(&ctx)?.allowed {
                admitted += 1;
            }
        }
        println!("{:<6} ({:<10}) admitted {}/20", user, tier, admitted);
    }

    let snapshot = limiter.metrics().snapshot();
    println!(
        "\ntotals: {} allowed, {} denied ({:.0}% denial rate)",
        snapshot.allowed,
        snapshot.denied,
        snapshot.denial_rate() * 100.0
    );

    Ok(())
}
