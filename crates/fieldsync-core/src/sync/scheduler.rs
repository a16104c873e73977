//! Retry policy: exponential backoff under a bounded attempt ceiling
//!
//! Policy lives here, outside the entry record and outside storage, so it
//! is testable on its own and swappable without touching either.

use std::time::Duration;

use crate::config::SyncConfig;

/// Backoff delay after the given (post-increment) attempt count:
/// `2^attempts` seconds, capped
#[must_use]
pub fn backoff_delay(attempts: u32, max_backoff: Duration) -> Duration {
    let seconds = 1_u64.checked_shl(attempts).unwrap_or(u64::MAX);
    Duration::from_secs(seconds).min(max_backoff)
}

/// Retry deadline for a failure at `attempts`, or `None` once the ceiling
/// is reached — the entry then stays a permanent failure
#[must_use]
pub fn next_retry_at(attempts: u32, config: &SyncConfig, now_ms: i64) -> Option<i64> {
    if attempts >= config.retry_ceiling {
        return None;
    }
    let delay = backoff_delay(attempts, config.max_backoff);
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    Some(now_ms.saturating_add(delay_ms))
}
