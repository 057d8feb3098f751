//! Rate limiting policies.
//!
//! A [`Policy`] is an immutable description of one rate limit: which
//! algorithm enforces it, how many operations are allowed per window, which
//! request dimensions the budget is tracked against, and what happens when
//! the backing state store is unreachable.
//!
//! Policies are validated once, at construction. An invalid policy is a
//! startup error ([`PolicyError`]), never a per-request one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The algorithm a policy uses to enforce its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Count requests in fixed, aligned windows. Cheapest state (one counter
    /// per key), but a client can fit up to `2 * limit` requests into a short
    /// span straddling a window boundary. That is the algorithm's defined
    /// behavior, not a bug; use the sliding window log where it matters.
    FixedWindow,
    /// Keep a log of request timestamps and admit only while fewer than
    /// `limit` fall inside the trailing window. Exact: no contiguous window
    /// ever contains more than `limit` admissions, at O(limit) state per key.
    SlidingWindowLog,
    /// Lazily refilled token bucket. Tolerates bursts up to the burst
    /// capacity while enforcing a long-run average of `limit / window`.
    TokenBucket,
}

/// A single request dimension a scope can isolate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    /// Authenticated identity (user id, API key).
    Identity,
    /// Client IP address.
    Ip,
    /// Route or endpoint name.
    Endpoint,
    /// Subscription tier or role.
    Tier,
}

/// Which request dimensions a policy's budget is tracked against.
///
/// Dimensions the scope does not name are deliberately ignored: a
/// `PerIdentity` policy gives each identity one budget shared across all
/// routes and addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// One budget for the whole service.
    Global,
    /// One budget per authenticated identity.
    PerIdentity,
    /// One budget per client IP.
    PerIp,
    /// One budget per route.
    PerEndpoint,
    /// One budget per combination of the listed dimensions.
    Composite(Vec<Dimension>),
}

/// Behavior when the state store cannot complete an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureMode {
    /// Admit the request and mark the decision as degraded.
    FailOpen,
    /// Deny the request with a conservative retry time of one window.
    FailClosed,
}

/// Validation error raised when constructing a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The limit must be at least 1.
    ZeroLimit,
    /// The window must be at least one millisecond.
    ZeroWindow,
    /// Token bucket burst capacity must be at least 1.
    ZeroBurst,
    /// The policy name is used as the key prefix and must not be empty.
    EmptyName,
    /// A composite scope must name at least one dimension.
    EmptyCompositeScope,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::ZeroLimit => write!(f, "limit must be greater than 0"),
            PolicyError::ZeroWindow => write!(f, "window must be at least 1ms"),
            PolicyError::ZeroBurst => write!(f, "burst capacity must be greater than 0"),
            PolicyError::EmptyName => write!(f, "policy name must not be empty"),
            PolicyError::EmptyCompositeScope => {
                write!(f, "composite scope must name at least one dimension")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// An immutable rate limiting policy.
///
/// Construct one with [`Policy::fixed_window`], [`Policy::sliding_window_log`]
/// or [`Policy::token_bucket`], then refine it with the `with_*` methods:
///
/// ```
/// use rategate::{Policy, Scope, FailureMode};
/// use std::time::Duration;
///
/// let policy = Policy::token_bucket("api", 100, Duration::from_secs(60))
///     .unwrap()
///     .with_scope(Scope::PerIdentity)
///     .with_burst(250)
///     .unwrap()
///     .with_failure_mode(FailureMode::FailClosed);
///
/// assert_eq!(policy.limit(), 100);
/// assert_eq!(policy.burst(), 250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    name: String,
    scope: Scope,
    algorithm: Algorithm,
    limit: u32,
    window: Duration,
    burst: u32,
    failure_mode: FailureMode,
}

impl Policy {
    fn new(
        name: &str,
        algorithm: Algorithm,
        limit: u32,
        window: Duration,
    ) -> Result<Self, PolicyError> {
        if name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if window.as_millis() == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self {
            name: name.to_string(),
            scope: Scope::Global,
            algorithm,
            limit,
            window,
            burst: limit,
            failure_mode: FailureMode::FailOpen,
        })
    }

    /// Create a fixed window policy allowing `limit` requests per `window`.
    pub fn fixed_window(name: &str, limit: u32, window: Duration) -> Result<Self, PolicyError> {
        Self::new(name, Algorithm::FixedWindow, limit, window)
    }

    /// Create a sliding window log policy allowing `limit` requests in any
    /// contiguous span of `window`.
    pub fn sliding_window_log(
        name: &str,
        limit: u32,
        window: Duration,
    ) -> Result<Self, PolicyError> {
        Self::new(name, Algorithm::SlidingWindowLog, limit, window)
    }

    /// Create a token bucket policy refilling `limit` tokens per `window`,
    /// with burst capacity defaulting to `limit`.
    pub fn token_bucket(name: &str, limit: u32, window: Duration) -> Result<Self, PolicyError> {
        Self::new(name, Algorithm::TokenBucket, limit, window)
    }

    /// Set the scope the budget is tracked against.
    ///
    /// An empty composite scope is caught by [`Policy::validate`], which the
    /// limiter runs at construction.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the token bucket burst capacity. Ignored by the other algorithms.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroBurst` if `burst` is zero.
    pub fn with_burst(mut self, burst: u32) -> Result<Self, PolicyError> {
        if burst == 0 {
            return Err(PolicyError::ZeroBurst);
        }
        self.burst = burst;
        Ok(self)
    }

    /// Set the behavior on state store failure. Defaults to fail-open.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Validate scope consistency. Called by the limiter at construction so
    /// a deserialized policy gets the same checks as a built one.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if self.limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if self.window.as_millis() == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if self.burst == 0 {
            return Err(PolicyError::ZeroBurst);
        }
        if let Scope::Composite(dims) = &self.scope {
            if dims.is_empty() {
                return Err(PolicyError::EmptyCompositeScope);
            }
        }
        Ok(())
    }

    /// The policy name, used as the scope key prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the budget is tracked against.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The enforcing algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// The time horizon of the limit.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The window in whole milliseconds, the unit all strategies work in.
    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Token bucket burst capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Behavior on state store failure.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }
}
