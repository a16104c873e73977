//! Lamport clock for causal ordering of journal entries

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// A logical (Lamport) clock.
///
/// Producers call [`tick`](Self::tick) before recording a mutation; the
/// authority calls [`observe`](Self::observe) for every clock value it
/// receives so its own clock stays ahead of everything it has seen.
///
/// The clock never wraps: exhausting the `u64` value space is a fatal scale
/// error, not an ordering ambiguity.
#[derive(Debug, Default)]
pub struct LamportClock {
    value: AtomicU64,
}

impl LamportClock {
    /// Create a clock starting at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Create a clock restored to a previously observed value
    ///
    /// Used at startup so the authority's clock never regresses below
    /// values it acknowledged before a restart.
    #[must_use]
    pub const fn restored(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    /// Advance the clock and return the new value
    pub fn tick(&self) -> Result<u64> {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            let next = current.checked_add(1).ok_or(Error::ClockOverflow)?;
            match self
                .value
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Ok(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// Merge a remote clock value: the local clock never decreases below it
    ///
    /// Does not advance past the remote value; the next [`tick`](Self::tick)
    /// produces a value strictly greater than everything observed.
    pub fn observe(&self, remote: u64) -> Result<()> {
        if remote == u64::MAX {
            return Err(Error::ClockOverflow);
        }
        self.value.fetch_max(remote, Ordering::SeqCst);
        Ok(())
    }

    /// Current clock value without advancing
    #[must_use]
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// The Lamport merge rule for a producer receiving a remote value:
/// `max(local, remote) + 1`
pub fn merge(local: u64, remote: u64) -> Result<u64> {
    local.max(remote).checked_add(1).ok_or(Error::ClockOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_strictly_increases() {
        let clock = LamportClock::new();
        let a = clock.tick().unwrap();
        let b = clock.tick().unwrap();
        let c = clock.tick().unwrap();
        assert!(a < b && b < c);
        assert_eq!(c, clock.current());
    }

    #[test]
    fn observe_never_decreases() {
        let clock = LamportClock::restored(10);
        clock.observe(5).unwrap();
        assert_eq!(clock.current(), 10);

        clock.observe(42).unwrap();
        assert_eq!(clock.current(), 42);
    }

    #[test]
    fn tick_after_observe_is_ahead_of_observed() {
        let clock = LamportClock::new();
        clock.observe(99).unwrap();
        assert_eq!(clock.tick().unwrap(), 100);
    }

    #[test]
    fn overflow_fails_loudly() {
        let clock = LamportClock::restored(u64::MAX);
        assert!(matches!(clock.tick(), Err(Error::ClockOverflow)));

        let clock = LamportClock::new();
        assert!(matches!(clock.observe(u64::MAX), Err(Error::ClockOverflow)));
    }

    #[test]
    fn merge_rule() {
        assert_eq!(merge(3, 7).unwrap(), 8);
        assert_eq!(merge(7, 3).unwrap(), 8);
        assert!(matches!(merge(u64::MAX, 0), Err(Error::ClockOverflow)));
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        use std::sync::Arc;

        let clock = Arc::new(LamportClock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = Arc::clone(&clock);
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| clock.tick().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate clock value {value}");
            }
        }
        assert_eq!(clock.current(), 8 * 500);
    }
}
