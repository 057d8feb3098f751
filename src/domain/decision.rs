//! The decision returned to callers.

use std::time::Duration;

/// Outcome of one admission decision.
///
/// A denial is a normal outcome, not an error: high-frequency throttling
/// must not pay exception overhead, so `allowed` is a plain field. HTTP
/// collaborators are expected to map `allowed == false` to a 429 with
/// `retry_after` in the `Retry-After` header, and to expose `limit`,
/// `remaining` and `reset_after` as headers on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// The effective limit the decision was made against.
    pub limit: u32,
    /// Budget left in the current window (algorithm-appropriate).
    pub remaining: u32,
    /// Time until the budget fully resets: the end of the fixed window, the
    /// oldest logged request leaving the sliding window, or the bucket
    /// refilling to burst capacity.
    pub reset_after: Duration,
    /// How long to wait before one more request can succeed. Set on
    /// denials, `None` on admissions.
    pub retry_after: Option<Duration>,
    /// True when the state store was unreachable and the policy's failure
    /// mode produced this decision instead of the algorithm. Observability
    /// layers should record degraded admissions separately.
    pub degraded: bool,
}

impl Decision {
    /// Whether the operation was denied for being over budget.
    pub fn throttled(&self) -> bool {
        !self.allowed
    }

    pub(crate) fn allow(limit: u32, remaining: u32, reset_after: Duration) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_after,
            retry_after: None,
            degraded: false,
        }
    }

    pub(crate) fn deny(limit: u32, reset_after: Duration, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after,
            retry_after: Some(retry_after),
            degraded: false,
        }
    }
}
