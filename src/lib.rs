//! Admission control for request-serving systems.
//!
//! `rategate` answers one question: may this request proceed right now?
//! It answers it the same way whether the state behind the answer lives
//! in process memory or in a shared Redis instance. A [`Policy`]
//! declares who is limited ([`Scope`]), how counting works
//! ([`Algorithm`]), and what the budget is; a [`RateLimiter`] turns a
//! [`RequestContext`] into a [`Decision`] carrying everything a caller
//! needs to build a response: allowed or denied, remaining budget, when
//! the budget resets, and when a denied caller should retry.
//!
//! # Quick start
//!
//! ```
//! use rategate::{InMemoryStore, Policy, RateLimiter, RequestContext, Scope, SystemClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = Policy::token_bucket("api", 100, Duration::from_secs(60))?
//!     .with_scope(Scope::PerIdentity)
//!     .with_burst(20)?;
//!
//! let limiter = RateLimiter::new(policy, InMemoryStore::new(), Arc::new(SystemClock))?;
//!
//! let ctx = RequestContext::new().with_identity("user-42");
//! let decision = limiter.decide(&ctx)?;
//! if decision.allowed {
//!     // serve the request; decision.remaining and decision.reset_after
//!     // feed the RateLimit response headers
//! } else {
//!     // reject with 429; decision.retry_after says when to come back
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Algorithms
//!
//! Three counting strategies, each a different trade-off between
//! precision, memory, and burst behavior:
//!
//! - [`Algorithm::FixedWindow`]: one counter per aligned window. Cheap
//!   and predictable, but up to twice the limit can pass in a span
//!   straddling a boundary.
//! - [`Algorithm::SlidingWindowLog`]: a timestamp log per key. Exact, in
//!   that no trailing window of the configured length ever admits more
//!   than the limit, at the cost of one entry per admitted request.
//! - [`Algorithm::TokenBucket`]: continuous refill with a configurable
//!   burst ceiling. Absorbs short spikes while holding the long-run
//!   average to the limit.
//!
//! # Scopes
//!
//! [`Scope`] selects which request dimensions share a budget: the whole
//! service ([`Scope::Global`]), each identity, each client IP, each
//! endpoint, or any combination via [`Scope::Composite`]. Keys from
//! different policies never collide, so several limiters can share one
//! store.
//!
//! # Distributed state
//!
//! [`InMemoryStore`] keeps state in a sharded map inside the process.
//! With the `redis-store` feature, `RedisStore` keeps it in Redis so all
//! replicas of a service enforce one shared budget; every check-and-count
//! runs as a single server-side script, so concurrent replicas never
//! admit more than the limit between them.
//!
//! # When the store fails
//!
//! A limiter whose store is unreachable does not take the service down
//! with it. [`FailureMode`] picks the bias: `FailOpen` admits, serving
//! availability; `FailClosed` denies, protecting a fragile backend.
//! Either way the decision is marked [`Decision::degraded`]. A circuit
//! breaker stops hammering a store that keeps failing and probes it again
//! after a recovery timeout.
//!
//! # Dynamic overrides
//!
//! A [`RateResolver`] adjusts the configured limit per request, for
//! example from a subscription tier or a temporary unlimited grant for
//! internal callers, without rebuilding the limiter. See
//! [`RateOverride`].

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use application::limiter::{LimiterError, RateLimiter, RateOverride, RateResolver};
pub use application::metrics::{Metrics, MetricsSnapshot};
pub use application::ports::{BucketState, Clock, LogAppend, StateStore, StoreError};
pub use domain::decision::Decision;
pub use domain::key::{resolve_key, RequestContext, ScopeKey};
pub use domain::policy::{
    Algorithm, Dimension, FailureMode, Policy, PolicyError, Scope,
};
pub use infrastructure::clock::SystemClock;
pub use infrastructure::memory::{InMemoryStore, Sweeper};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
