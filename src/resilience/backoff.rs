//! Exponential backoff with jitter for telemetry uploads.

use std::time::Duration;

use rand::Rng;

/// Delay schedule between upload attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    /// Schedule used by the buffered sink: 100ms doubling up to 2s.
    pub const UPLOAD: Backoff = Backoff {
        base_ms: 100,
        max_ms: 2_000,
    };

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::UPLOAD
    }
}

/// `base_ms * 2^(attempt-1)`, capped at `max_ms`, plus up to 10% jitter.
/// Attempt 0 means no wait.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
