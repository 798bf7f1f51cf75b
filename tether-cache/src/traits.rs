//! Fetcher trait, cacheable resource marker, and cache statistics.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tether_core::{CacheError, CacheKey, Email, ResourceClass, Task};

/// Retrieves a snapshot for a key from the remote authority.
///
/// The cache spawns fetches as background tasks, so implementations must be
/// `'static`. The request layer behind this trait is responsible for
/// attaching credentials and for mapping an Unauthorized response to a
/// forced session clear.
#[async_trait]
pub trait ResourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, CacheError>;
}

/// An entity that can be written straight into its own cache entry.
///
/// # Implementation Requirements
///
/// - `resource_class()` must be an entity class (`ResourceClass::is_entity`)
/// - `entity_id()` must be the id the remote authority addresses it by
pub trait CacheableResource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn resource_class() -> ResourceClass;

    fn entity_id(&self) -> &str;

    fn cache_key(&self) -> CacheKey {
        CacheKey::entity(Self::resource_class(), self.entity_id().to_string())
    }
}

impl CacheableResource for Email {
    fn resource_class() -> ResourceClass {
        ResourceClass::Email
    }

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl CacheableResource for Task {
    fn resource_class() -> ResourceClass {
        ResourceClass::Task
    }

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a fresh entry.
    pub hits: u64,
    /// Reads that had to wait for a fetch.
    pub misses: u64,
    /// Reads answered from a stale entry while revalidating.
    pub stale_serves: u64,
    /// Remote fetches started.
    pub fetches_started: u64,
    /// Reads that attached to a fetch already in flight.
    pub fetches_coalesced: u64,
    /// Fetch results dropped because a newer fetch or write superseded them.
    pub discarded_writes: u64,
    /// Entries marked invalid.
    pub invalidations: u64,
    /// Entries currently held.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Stale serves count as hits.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_serves;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
