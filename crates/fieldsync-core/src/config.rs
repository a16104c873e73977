//! Engine configuration

use std::time::Duration;

/// Tunables for the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed application attempts before an entry becomes a permanent
    /// failure (no further `next_retry_at`)
    pub retry_ceiling: u32,
    /// Upper bound on the exponential backoff delay
    pub max_backoff: Duration,
    /// Bound on a single domain application attempt; exceeding it counts
    /// as a failure
    pub apply_timeout: Duration,
    /// Age after which a `processing` entry is considered crashed and
    /// requeued by the recovery sweep
    pub processing_timeout: Duration,
    /// Cadence of the background sweep; kept below the minimum backoff so
    /// a just-eligible retry waits at most one sweep period
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 3,
            max_backoff: Duration::from_secs(60),
            apply_timeout: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl SyncConfig {
    /// Set the retry ceiling
    #[must_use]
    pub const fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    /// Set the application attempt timeout
    #[must_use]
    pub const fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// Set the stale-processing recovery threshold
    #[must_use]
    pub const fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Set the background sweep interval
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
