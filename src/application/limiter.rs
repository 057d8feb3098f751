//! The rate limiter façade.
//!
//! Binds a policy, a key resolver, an algorithm strategy, and a state store
//! into the single decision operation callers use. One limiter owns one
//! policy; processes enforcing several policies hold several limiters, each
//! with its own injected store and clock, so there is no process-wide
//! shared state and tests get full isolation.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, StateStore, StoreError};
use crate::application::strategy;
use crate::domain::decision::Decision;
use crate::domain::key::{resolve_key, RequestContext};
use crate::domain::policy::{FailureMode, Policy, PolicyError};
use std::sync::Arc;
use std::time::Duration;

/// A dynamic adjustment to a policy's limit, computed per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOverride {
    /// Bypass the state store entirely and always allow.
    Unlimited,
    /// Replace the policy's static limit with this one.
    Limit(u32),
}

/// Computes a caller-specific limit at decision time, e.g. from a
/// subscription tier. Returning `None` keeps the policy's static limit.
pub trait RateResolver: Send + Sync {
    /// Resolve an override for the given request context.
    fn resolve(&self, ctx: &RequestContext) -> Option<RateOverride>;
}

/// Failure of the decision operation itself.
///
/// Only unexpected adapter failures surface here; an unreachable store is
/// absorbed by the policy's failure mode, and a throttled request is a
/// normal [`Decision`]. Callers mapping this to HTTP should answer with a
/// generic server error, never a 429.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    /// The state store adapter failed in an unclassified way.
    Internal(String),
}

impl std::fmt::Display for LimiterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimiterError::Internal(msg) => write!(f, "rate limiter internal error: {}", msg),
        }
    }
}

impl std::error::Error for LimiterError {}

/// Admission-control decision engine for one policy.
///
/// ```
/// use rategate::{InMemoryStore, Policy, RateLimiter, RequestContext, Scope, SystemClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let policy = Policy::fixed_window("search", 2, Duration::from_secs(60))
///     .unwrap()
///     .with_scope(Scope::PerIdentity);
/// let limiter = RateLimiter::new(
///     policy,
///     Arc::new(InMemoryStore::new()),
///     Arc::new(SystemClock::new()),
/// )
/// .unwrap();
///
/// let ctx = RequestContext::new().with_identity("alice");
/// assert!(limiter.decide(&ctx).unwrap().allowed);
/// assert!(limiter.decide(&ctx).unwrap().allowed);
/// assert!(limiter.decide(&ctx).unwrap().throttled());
/// ```
pub struct RateLimiter<S>
where
    S: StateStore,
{
    policy: Policy,
    store: S,
    clock: Arc<dyn Clock>,
    resolver: Option<Arc<dyn RateResolver>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
}

impl<S> RateLimiter<S>
where
    S: StateStore,
{
    /// Create a limiter for a policy.
    ///
    /// # Errors
    /// Returns the policy's validation error, so a misconfigured policy
    /// fails at startup rather than on the request path.
    pub fn new(policy: Policy, store: S, clock: Arc<dyn Clock>) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self {
            policy,
            store,
            clock,
            resolver: None,
            breaker: Arc::new(CircuitBreaker::new()),
            metrics: Metrics::new(),
        })
    }

    /// Attach a dynamic rate resolver.
    pub fn with_rate_resolver(mut self, resolver: Arc<dyn RateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the default circuit breaker, e.g. to tune its thresholds or
    /// share one breaker across limiters backed by the same store.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Decide whether the operation described by `ctx` may proceed.
    ///
    /// Performs at most one round trip to the state store and never blocks
    /// beyond it. A denial is a normal `Ok` decision carrying the computed
    /// wait time; only an unclassified adapter failure is an `Err`.
    pub fn decide(&self, ctx: &RequestContext) -> Result<Decision, LimiterError> {
        let now_ms = self.clock.now_millis();

        let mut limit = self.policy.limit();
        let mut burst = self.policy.burst();
        if let Some(resolver) = &self.resolver {
            match resolver.resolve(ctx) {
                Some(RateOverride::Unlimited) => {
                    self.metrics.record_allowed();
                    return Ok(Decision::allow(limit, limit, Duration::ZERO));
                }
                Some(RateOverride::Limit(0)) => {
                    tracing::warn!(
                        policy = self.policy.name(),
                        "ignoring dynamic limit of zero"
                    );
                }
                Some(RateOverride::Limit(n)) => {
                    // A default burst tracks the effective limit; an
                    // explicitly configured burst is kept as-is.
                    if burst == limit {
                        burst = n;
                    }
                    limit = n;
                }
                None => {}
            }
        }

        if !self.breaker.allow_request(now_ms) {
            return Ok(self.degraded_decision(limit));
        }

        let key = resolve_key(&self.policy, ctx);
        match strategy::decide(&self.policy, limit, burst, &key, &self.store, now_ms) {
            Ok(decision) => {
                self.breaker.record_success();
                if decision.allowed {
                    self.metrics.record_allowed();
                } else {
                    self.metrics.record_denied();
                }
                Ok(decision)
            }
            Err(StoreError::Unavailable) => {
                self.breaker.record_failure(now_ms);
                tracing::warn!(
                    policy = self.policy.name(),
                    failure_mode = ?self.policy.failure_mode(),
                    "state store unavailable, applying failure mode"
                );
                Ok(self.degraded_decision(limit))
            }
            Err(StoreError::Internal(msg)) => {
                self.breaker.record_failure(now_ms);
                Err(LimiterError::Internal(msg))
            }
        }
    }

    /// Produce the decision dictated by the policy's failure mode.
    fn degraded_decision(&self, limit: u32) -> Decision {
        self.metrics.record_degraded();
        let window = self.policy.window();
        match self.policy.failure_mode() {
            FailureMode::FailOpen => {
                self.metrics.record_allowed();
                Decision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_after: window,
                    retry_after: None,
                    degraded: true,
                }
            }
            FailureMode::FailClosed => {
                self.metrics.record_denied();
                Decision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_after: window,
                    retry_after: Some(window),
                    degraded: true,
                }
            }
        }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Decision counters.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The circuit breaker guarding the state store.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
