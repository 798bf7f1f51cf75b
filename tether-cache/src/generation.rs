//! Fetch generations for ordering cache writes.
//!
//! Every fetch start, point write, and invalidation takes a generation from
//! one monotonic clock. Writes to a key are ordered by the generation taken
//! when the fetch *started*, so a slow fetch that completes after a newer
//! one began can be recognized and dropped.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point in the cache's fetch history.
///
/// Generations are monotonically increasing and comparable; a larger value
/// was issued later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation before anything was issued.
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Check if this generation was issued after another.
    pub fn is_newer_than(&self, other: &Generation) -> bool {
        self.0 > other.0
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Issues strictly increasing generations. Never reset, not even when the
/// cache is torn down, so results of fetches started before a teardown
/// can never match an entry created after it.
#[derive(Debug, Default)]
pub struct GenerationClock {
    last: AtomicU64,
}

impl GenerationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next generation.
    pub fn next(&self) -> Generation {
        Generation(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued generation.
    pub fn current(&self) -> Generation {
        Generation(self.last.load(Ordering::SeqCst))
    }
}
