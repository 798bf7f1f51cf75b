//! tether Cache - Remote Resource Snapshots
//!
//! A keyed cache of server state with explicit staleness. Reads return
//! [`CacheRead<T>`], which says whether the value came from cache and
//! whether it is past its staleness window, so callers never mistake an
//! old snapshot for a fresh one.
//!
//! # Guarantees
//!
//! - At most one fetch per key is in flight at a time.
//! - Stale values are served immediately while a background fetch
//!   revalidates them.
//! - A fetch result is dropped if a newer fetch or point write for the same
//!   key started after it did, whatever order they complete in.
//! - An invalidated key is never served from cache; its next read waits for
//!   a fetch that started after the invalidation.
//!
//! # Example
//!
//! ```ignore
//! let cache = RemoteCache::new(fetcher, CacheConfig::default());
//! let key = CacheKey::new(ResourceClass::Emails).with_param("category", "work");
//!
//! let read = cache.read_as::<Page<Email>>(&key, ReadPolicy::default()).await?;
//! if read.is_stale() {
//!     tracing::debug!(age_ms = read.age().as_millis() as u64, "Showing stale listing");
//! }
//! ```

pub mod freshness;
pub mod generation;
pub mod read_through;
pub mod traits;

pub use freshness::{CacheRead, ReadPolicy};
pub use generation::{Generation, GenerationClock};
pub use read_through::{CacheConfig, CacheEvent, RemoteCache};
pub use traits::{CacheStats, CacheableResource, ResourceFetcher};
