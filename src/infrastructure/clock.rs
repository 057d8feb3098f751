//! Clock adapters.
//!
//! `SystemClock` is the production implementation; see `ManualClock` in
//! `crate::infrastructure::mocks` for a controllable test clock.

use crate::application::ports::Clock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock reporting milliseconds since the Unix epoch.
///
/// Wall time (rather than a process-local monotonic instant) is deliberate:
/// timestamps written to a shared store must be comparable across processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
