//! Read policies and read results carrying staleness metadata.
//!
//! Reads never hide how old their data is: every read returns a
//! [`CacheRead<T>`] saying whether it was served from cache, whether the
//! served value is past its staleness window, and when it was fetched.

use std::time::Duration;
use tokio::time::Instant;

/// How a read treats an existing cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Serve fresh values directly; serve stale values immediately while a
    /// background refetch runs (stale-while-revalidate).
    #[default]
    StaleWhileRevalidate,

    /// Ignore any cached value and wait for a fetch. Attaches to a fetch
    /// that is already in flight instead of starting another one.
    ForceRefresh,
}

impl ReadPolicy {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::ForceRefresh)
    }
}

/// Result of a cache read.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    fetched_at: Instant,
    was_cache_hit: bool,
    is_stale: bool,
}

impl<T> CacheRead<T> {
    /// A cached value still inside its staleness window.
    pub fn fresh_hit(value: T, fetched_at: Instant) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: true,
            is_stale: false,
        }
    }

    /// A cached value past its window, served while a refetch runs.
    pub fn stale_hit(value: T, fetched_at: Instant) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: true,
            is_stale: true,
        }
    }

    /// A value the caller waited for.
    pub fn fetched(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            was_cache_hit: false,
            is_stale: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// True when the value was served past its staleness window.
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    /// Time elapsed since the value was fetched.
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    /// Map the inner value, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            was_cache_hit: self.was_cache_hit,
            is_stale: self.is_stale,
        }
    }

    /// Map the inner value through a fallible conversion.
    pub fn try_map<U, E, F>(self, f: F) -> Result<CacheRead<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(CacheRead {
            value: f(self.value)?,
            fetched_at: self.fetched_at,
            was_cache_hit: self.was_cache_hit,
            is_stale: self.is_stale,
        })
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
