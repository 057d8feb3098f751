//! In-process state store.
//!
//! Backed by a sharded concurrent map: each atomic primitive holds its
//! shard's lock for exactly the read-modify-write and nothing else. Suited
//! to a single-instance deployment; use the Redis adapter when several
//! processes must share budgets.
//!
//! Scope keys derived from client IPs or anonymous identities have
//! unbounded cardinality, so every entry carries an expiry and [`sweep`]
//! (or a background [`Sweeper`]) drops entries idle past it.
//!
//! [`sweep`]: InMemoryStore::sweep

use crate::application::metrics::Metrics;
use crate::application::ports::{BucketState, Clock, LogAppend, StateStore, StoreError};
use crate::domain::key::ScopeKey;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Per-key limiter state. A key's slot type is fixed in practice because
/// keys are prefixed by policy name; a mismatch is treated as absent state.
#[derive(Debug)]
enum Slot {
    Window { count: u64, start_ms: u64 },
    Log(VecDeque<u64>),
    Bucket(BucketState),
}

#[derive(Debug)]
struct KeyEntry {
    expires_at_ms: u64,
    slot: Slot,
}

/// Thread-safe in-process state store.
///
/// DashMap provides fine-grained per-shard locking; an entry guard spans
/// each whole read-modify-write, which is what makes the primitives atomic
/// with respect to every other thread in the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    map: DashMap<ScopeKey, KeyEntry, ahash::RandomState>,
    metrics: Option<Metrics>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(ahash::RandomState::new()),
            metrics: None,
        }
    }

    /// Record evictions on the given metrics.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop all tracked state.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Evict entries whose expiry has passed, returning how many were
    /// dropped. Expired entries that are touched before a sweep are reset
    /// in place by the primitives, so sweeping only bounds memory; it is
    /// never needed for correctness.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.expires_at_ms > now_ms);
        let evicted = before.saturating_sub(self.map.len());
        if evicted > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_evictions(evicted as u64);
            }
            tracing::debug!(evicted, "swept idle rate limit keys");
        }
        evicted
    }

    /// Spawn a background thread sweeping the store every `interval`.
    ///
    /// The returned [`Sweeper`] stops the thread when dropped.
    pub fn start_sweeper(
        store: Arc<InMemoryStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Sweeper {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::park_timeout(interval);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                store.sweep(clock.now_millis());
            }
        });
        Sweeper {
            stop,
            handle: Some(handle),
        }
    }
}

impl StateStore for InMemoryStore {
    fn incr_window(
        &self,
        key: &ScopeKey,
        window_start_ms: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let expires_at_ms = window_start_ms.saturating_add(ttl_millis(ttl));
        let mut guard = self.map.entry(key.clone()).or_insert_with(|| KeyEntry {
            expires_at_ms,
            slot: Slot::Window {
                count: 0,
                start_ms: window_start_ms,
            },
        });

        let entry = &mut *guard;
        match &mut entry.slot {
            Slot::Window { count, start_ms } if *start_ms == window_start_ms => {
                *count += 1;
                Ok(*count)
            }
            slot => {
                // A previous window (or a stale slot of another shape):
                // resetting and counting this request is one step under the
                // shard lock, so no two requests can both open the window.
                *slot = Slot::Window {
                    count: 1,
                    start_ms: window_start_ms,
                };
                entry.expires_at_ms = expires_at_ms;
                Ok(1)
            }
        }
    }

    fn append_log(
        &self,
        key: &ScopeKey,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        ttl: Duration,
    ) -> Result<LogAppend, StoreError> {
        let mut guard = self.map.entry(key.clone()).or_insert_with(|| KeyEntry {
            expires_at_ms: 0,
            slot: Slot::Log(VecDeque::new()),
        });

        let entry = &mut *guard;
        if !matches!(entry.slot, Slot::Log(_)) {
            entry.slot = Slot::Log(VecDeque::new());
        }
        let log = match &mut entry.slot {
            Slot::Log(log) => log,
            _ => unreachable!("slot was just normalized to a log"),
        };

        let horizon = now_ms.saturating_sub(window_ms);
        while log.front().is_some_and(|&ts| ts < horizon) {
            log.pop_front();
        }

        let appended = (log.len() as u64) < u64::from(limit);
        if appended {
            log.push_back(now_ms);
        }

        entry.expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));
        Ok(LogAppend {
            appended,
            count: log.len() as u32,
            oldest_ms: log.front().copied(),
        })
    }

    fn update_bucket(
        &self,
        key: &ScopeKey,
        ttl: Duration,
        update: &dyn Fn(Option<BucketState>) -> BucketState,
    ) -> Result<BucketState, StoreError> {
        match self.map.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let previous = match &occupied.get().slot {
                    Slot::Bucket(bucket) => Some(*bucket),
                    _ => None,
                };
                let next = update(previous);
                let entry = occupied.get_mut();
                entry.slot = Slot::Bucket(next);
                entry.expires_at_ms = next.last_refill_ms.saturating_add(ttl_millis(ttl));
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                let next = update(None);
                vacant.insert(KeyEntry {
                    expires_at_ms: next.last_refill_ms.saturating_add(ttl_millis(ttl)),
                    slot: Slot::Bucket(next),
                });
                Ok(next)
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Handle owning the background sweep thread.
///
/// Dropping the handle (or calling [`Sweeper::stop`]) signals the thread
/// and joins it.
#[derive(Debug)]
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stop the sweep thread and wait for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
