//! Circuit breaker around the state store.
//!
//! A distributed store that is down tends to fail slowly (timeouts), and a
//! limiter that pays that timeout on every request adds latency exactly when
//! the service is already struggling. After a run of consecutive store
//! failures the circuit opens and the limiter applies the policy's failure
//! mode directly, without a store round trip, until a recovery timeout has
//! passed and a probe succeeds.
//!
//! Time is passed in by the caller as epoch milliseconds so the breaker is
//! deterministic under a test clock.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operating normally; store operations proceed.
    Closed = 0,
    /// Too many consecutive failures; store operations are skipped.
    Open = 1,
    /// Recovery timeout elapsed; letting probes through.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to wait before probing for recovery, in milliseconds.
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Tracks consecutive store failures and gates store access.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_failure_ms: AtomicU64,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            config,
        }
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a store operation should be attempted at `now_ms`.
    ///
    /// Returns `false` while the circuit is open and the recovery timeout
    /// has not elapsed; the caller should then treat the store as
    /// unavailable without contacting it.
    pub fn allow_request(&self, now_ms: u64) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last = self.last_failure_ms.load(Ordering::Acquire);
                if now_ms.saturating_sub(last) < self.config.recovery_timeout_ms {
                    return false;
                }
                // Compare-exchange so only one caller becomes the probe.
                let transitioned = self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                transitioned.is_ok() || self.state() == CircuitState::HalfOpen
            }
        }
    }

    /// Record a successful store operation.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() == CircuitState::HalfOpen {
            self.state
                .store(CircuitState::Closed as u8, Ordering::Release);
        }
    }

    /// Record a failed store operation at `now_ms`.
    pub fn record_failure(&self, now_ms: u64) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ms.store(now_ms, Ordering::Release);

        match self.state() {
            CircuitState::HalfOpen => {
                // Probe failed, back to open.
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    tracing::warn!(
                        consecutive_failures = failures,
                        "state store circuit opened"
                    );
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Number of consecutive failures seen so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
