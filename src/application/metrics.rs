//! Observability counters for admission decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters tracking limiter behavior.
///
/// All counters use relaxed atomics; they are updated on every decision and
/// can be read at any time. Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests admitted.
    allowed: AtomicU64,
    /// Requests denied for being over budget.
    denied: AtomicU64,
    /// Decisions produced by a failure mode instead of the algorithm.
    degraded: AtomicU64,
    /// Idle keys swept from the in-process store.
    keys_evicted: AtomicU64,
}

impl Metrics {
    /// Create a fresh set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.inner.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.inner.keys_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Total requests admitted.
    pub fn allowed(&self) -> u64 {
        self.inner.allowed.load(Ordering::Relaxed)
    }

    /// Total requests denied.
    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    /// Total decisions made under a failure mode.
    pub fn degraded(&self) -> u64 {
        self.inner.degraded.load(Ordering::Relaxed)
    }

    /// Total idle keys evicted from storage.
    pub fn keys_evicted(&self) -> u64 {
        self.inner.keys_evicted.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allowed: self.allowed(),
            denied: self.denied(),
            degraded: self.degraded(),
            keys_evicted: self.keys_evicted(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.inner.allowed.store(0, Ordering::Relaxed);
        self.inner.denied.store(0, Ordering::Relaxed);
        self.inner.degraded.store(0, Ordering::Relaxed);
        self.inner.keys_evicted.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests admitted.
    pub allowed: u64,
    /// Requests denied.
    pub denied: u64,
    /// Decisions made under a failure mode.
    pub degraded: u64,
    /// Idle keys evicted from storage.
    pub keys_evicted: u64,
}

impl MetricsSnapshot {
    /// Total decisions made.
    pub fn total(&self) -> u64 {
        self.allowed.saturating_add(self.denied)
    }

    /// Ratio of denied to total decisions, 0.0 when none were made.
    pub fn denial_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.denied as f64 / total as f64
        }
    }
}
