//! Read-through cache of remote resource snapshots.
//!
//! Routes each read by the state of its entry:
//!
//! - no entry, or an invalidated one: wait for a fetch
//! - fresh entry: answer from cache
//! - stale entry: answer from cache and revalidate in the background
//!
//! At most one fetch per key is in flight; concurrent readers attach to it.
//! Fetches run as spawned tasks and commit their own result, so a
//! background revalidation completes even when nobody awaits it. A result
//! is committed only if no newer fetch (or point write) for the same key
//! started after it did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_core::{CacheError, CacheKey, ResourceClass};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use super::freshness::{CacheRead, ReadPolicy};
use super::generation::{Generation, GenerationClock};
use super::traits::{CacheStats, CacheableResource, ResourceFetcher};

type SharedFetch = Shared<BoxFuture<'static, Result<Value, CacheError>>>;

/// Configuration for the remote cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Staleness window for classes without an override.
    pub default_stale_after: Duration,
    /// Per-class staleness windows.
    pub class_stale_after: HashMap<ResourceClass, Duration>,
    /// Capacity of the cache event channel.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_stale_after: Duration::from_secs(30),
            class_stale_after: HashMap::new(),
            event_capacity: 64,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default staleness window.
    pub fn with_stale_after(mut self, duration: Duration) -> Self {
        self.default_stale_after = duration;
        self
    }

    /// Override the staleness window for one class.
    pub fn with_class_stale_after(mut self, class: ResourceClass, duration: Duration) -> Self {
        self.class_stale_after.insert(class, duration);
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn stale_after_for(&self, class: ResourceClass) -> Duration {
        self.class_stale_after
            .get(&class)
            .copied()
            .unwrap_or(self.default_stale_after)
    }
}

/// Change notifications emitted by the cache.
///
/// Views subscribe to these to know when to re-read; nothing here is tied
/// to a rendering cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new value was committed for a key.
    Updated { key: CacheKey },
    /// One key was marked invalid.
    KeyInvalidated { key: CacheKey },
    /// Every key of a class was marked invalid.
    ClassInvalidated { class: ResourceClass, count: u64 },
    /// The whole cache was torn down.
    Cleared { count: u64 },
}

struct Snapshot {
    value: Value,
    fetched_at: Instant,
}

impl Snapshot {
    fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        now <= self.fetched_at + stale_after
    }
}

struct InFlight {
    generation: Generation,
    fetch: SharedFetch,
}

#[derive(Default)]
struct Entry {
    snapshot: Option<Snapshot>,
    /// Generation of the newest fetch start or point write.
    latest_started: Option<Generation>,
    /// Set by invalidation; fetches at or before this boundary are not
    /// trusted to satisfy a read.
    invalidated_at: Option<Generation>,
    /// Generation of the newest point write.
    written_at: Option<Generation>,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }

    fn is_live(&self) -> bool {
        self.snapshot.is_some() || self.in_flight.is_some()
    }

    /// The current value, when a point write landed after `generation`
    /// started and nothing has invalidated it since.
    fn written_since(&self, generation: Generation) -> Option<Value> {
        let written = self.written_at?;
        if !written.is_newer_than(&generation) || self.is_invalidated() {
            return None;
        }
        self.snapshot.as_ref().map(|snapshot| snapshot.value.clone())
    }

    /// The in-flight fetch a reader may join, if any.
    fn attachable(&self) -> Option<SharedFetch> {
        let in_flight = self.in_flight.as_ref()?;
        match self.invalidated_at {
            Some(boundary) if !in_flight.generation.is_newer_than(&boundary) => None,
            _ => Some(in_flight.fetch.clone()),
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_serves: AtomicU64,
    fetches_started: AtomicU64,
    fetches_coalesced: AtomicU64,
    discarded_writes: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

struct CacheInner<F> {
    fetcher: Arc<F>,
    config: CacheConfig,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    clock: GenerationClock,
    counters: Counters,
    events: broadcast::Sender<CacheEvent>,
}

enum ReadAction {
    Ready(CacheRead<Value>),
    Wait(SharedFetch),
}

/// Keyed, staleness-aware cache with single-flight fetch coordination.
///
/// # Example
///
/// ```ignore
/// let cache = RemoteCache::new(fetcher, CacheConfig::default());
///
/// // Blocks on first read, then serves from cache.
/// let categories = cache
///     .read_as::<Vec<Category>>(&CacheKey::new(ResourceClass::Categories), ReadPolicy::default())
///     .await?;
///
/// // After a category mutation:
/// cache.invalidate_classes(&[ResourceClass::Categories, ResourceClass::Emails]).await;
/// ```
pub struct RemoteCache<F: ResourceFetcher> {
    inner: Arc<CacheInner<F>>,
}

impl<F: ResourceFetcher> RemoteCache<F> {
    pub fn new(fetcher: Arc<F>, config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                config,
                entries: Mutex::new(HashMap::new()),
                clock: GenerationClock::new(),
                counters: Counters::default(),
                events,
            }),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults(fetcher: Arc<F>) -> Self {
        Self::new(fetcher, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    /// Subscribe to cache change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Read the snapshot for `key`, fetching from the remote authority as
    /// the entry's state requires.
    pub async fn read(
        &self,
        key: &CacheKey,
        policy: ReadPolicy,
    ) -> Result<CacheRead<Value>, CacheError> {
        match self.plan_read(key, policy).await {
            ReadAction::Ready(read) => Ok(read),
            ReadAction::Wait(fetch) => fetch.await.map(CacheRead::fetched),
        }
    }

    /// Read and decode the snapshot for `key`.
    pub async fn read_as<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: ReadPolicy,
    ) -> Result<CacheRead<T>, CacheError> {
        self.read(key, policy).await?.try_map(|value| {
            serde_json::from_value(value).map_err(|e| CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn plan_read(&self, key: &CacheKey, policy: ReadPolicy) -> ReadAction {
        let stale_after = self.inner.config.stale_after_for(key.class());
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();

        if !policy.is_forced() && !entry.is_invalidated() {
            if let Some(snapshot) = &entry.snapshot {
                if snapshot.is_fresh(Instant::now(), stale_after) {
                    Counters::bump(&self.inner.counters.hits);
                    return ReadAction::Ready(CacheRead::fresh_hit(
                        snapshot.value.clone(),
                        snapshot.fetched_at,
                    ));
                }

                let read = CacheRead::stale_hit(snapshot.value.clone(), snapshot.fetched_at);
                Counters::bump(&self.inner.counters.stale_serves);
                if entry.in_flight.is_none() {
                    tracing::debug!(key = %key, "Serving stale value, revalidating in background");
                    CacheInner::start_fetch(&self.inner, key, entry);
                }
                return ReadAction::Ready(read);
            }
        }

        Counters::bump(&self.inner.counters.misses);
        if let Some(fetch) = entry.attachable() {
            Counters::bump(&self.inner.counters.fetches_coalesced);
            tracing::debug!(key = %key, "Attaching to in-flight fetch");
            return ReadAction::Wait(fetch);
        }
        ReadAction::Wait(CacheInner::start_fetch(&self.inner, key, entry))
    }

    /// The current snapshot for `key` without touching the network.
    ///
    /// Returns `None` when there is no value or the entry is invalidated.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheRead<Value>> {
        let stale_after = self.inner.config.stale_after_for(key.class());
        let entries = self.inner.entries.lock().await;
        let entry = entries.get(key)?;
        if entry.is_invalidated() {
            return None;
        }
        let snapshot = entry.snapshot.as_ref()?;
        let read = if snapshot.is_fresh(Instant::now(), stale_after) {
            CacheRead::fresh_hit(snapshot.value.clone(), snapshot.fetched_at)
        } else {
            CacheRead::stale_hit(snapshot.value.clone(), snapshot.fetched_at)
        };
        Some(read)
    }

    /// Whether a fetch for `key` is currently in flight.
    pub async fn is_in_flight(&self, key: &CacheKey) -> bool {
        let entries = self.inner.entries.lock().await;
        entries
            .get(key)
            .map(|entry| entry.in_flight.is_some())
            .unwrap_or(false)
    }

    /// Write an authoritative value directly into `key`.
    ///
    /// The write takes a new generation, so any fetch for `key` that started
    /// earlier can no longer commit over it. Readers already waiting on such
    /// a fetch are answered with this value instead of the fetched one.
    pub async fn put(&self, key: &CacheKey, value: Value) {
        let generation = self.inner.clock.next();
        {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(key.clone()).or_default();
            entry.latest_started = Some(generation);
            entry.written_at = Some(generation);
            entry.in_flight = None;
            entry.invalidated_at = None;
            entry.snapshot = Some(Snapshot {
                value,
                fetched_at: Instant::now(),
            });
        }
        tracing::debug!(key = %key, generation = %generation, "Point write committed");
        self.inner.emit(CacheEvent::Updated { key: key.clone() });
    }

    /// Write an entity into its own entry.
    pub async fn put_entity<T: CacheableResource>(&self, entity: &T) -> Result<(), CacheError> {
        let key = entity.cache_key();
        let value = serde_json::to_value(entity).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.put(&key, value).await;
        Ok(())
    }

    /// Mark one key invalid. Returns whether there was anything to mark.
    pub async fn invalidate_key(&self, key: &CacheKey) -> bool {
        let boundary = self.inner.clock.next();
        let marked = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) if entry.is_live() => {
                    entry.invalidated_at = Some(boundary);
                    true
                }
                _ => false,
            }
        };
        if marked {
            Counters::bump(&self.inner.counters.invalidations);
            tracing::debug!(key = %key, "Key invalidated");
            self.inner
                .emit(CacheEvent::KeyInvalidated { key: key.clone() });
        }
        marked
    }

    /// Mark every key of `class` invalid. The next read of any of them
    /// fetches, regardless of its staleness window.
    pub async fn invalidate_class(&self, class: ResourceClass) -> u64 {
        let boundary = self.inner.clock.next();
        let count = {
            let mut entries = self.inner.entries.lock().await;
            let mut count = 0u64;
            for (key, entry) in entries.iter_mut() {
                if key.belongs_to(class) && entry.is_live() {
                    entry.invalidated_at = Some(boundary);
                    count += 1;
                }
            }
            count
        };
        Counters::add(&self.inner.counters.invalidations, count);
        tracing::debug!(class = %class, count, "Class invalidated");
        self.inner
            .emit(CacheEvent::ClassInvalidated { class, count });
        count
    }

    /// Invalidate several classes. Returns the total number of keys marked.
    pub async fn invalidate_classes(&self, classes: &[ResourceClass]) -> u64 {
        let mut total = 0;
        for class in classes {
            total += self.invalidate_class(*class).await;
        }
        total
    }

    /// Tear the whole cache down. In-flight fetches are left to finish but
    /// their results are dropped.
    pub async fn clear(&self) -> u64 {
        let count = {
            let mut entries = self.inner.entries.lock().await;
            let count = entries.len() as u64;
            entries.clear();
            count
        };
        tracing::info!(count, "Cache cleared");
        self.inner.emit(CacheEvent::Cleared { count });
        count
    }

    /// Snapshot of cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let entry_count = self.inner.entries.lock().await.len() as u64;
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            stale_serves: c.stale_serves.load(Ordering::Relaxed),
            fetches_started: c.fetches_started.load(Ordering::Relaxed),
            fetches_coalesced: c.fetches_coalesced.load(Ordering::Relaxed),
            discarded_writes: c.discarded_writes.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

impl<F: ResourceFetcher> CacheInner<F> {
    /// Start a fetch for `key` and record it as the entry's in-flight fetch.
    fn start_fetch(inner: &Arc<Self>, key: &CacheKey, entry: &mut Entry) -> SharedFetch {
        let generation = inner.clock.next();
        entry.latest_started = Some(generation);
        Counters::bump(&inner.counters.fetches_started);
        tracing::debug!(key = %key, generation = %generation, "Fetch started");

        let task_inner = Arc::clone(inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = task_inner.fetcher.fetch(&task_key).await;
            task_inner.commit(&task_key, generation, result).await
        });

        let aborted_key = key.to_string();
        let fetch = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(key = %aborted_key, error = %err, "Fetch task did not complete");
                    Err(CacheError::FetchAborted { key: aborted_key })
                }
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        fetch
    }

    /// Commit a fetch result and return what its readers should see.
    async fn commit(
        &self,
        key: &CacheKey,
        generation: Generation,
        result: Result<Value, CacheError>,
    ) -> Result<Value, CacheError> {
        {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(key) else {
                tracing::debug!(key = %key, generation = %generation, "Cache torn down during fetch, result dropped");
                return result;
            };

            if entry
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                entry.in_flight = None;
            }

            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Fetch failed, cached value left unchanged");
                    return Err(err);
                }
            };

            if entry.latest_started != Some(generation) {
                Counters::bump(&self.counters.discarded_writes);
                tracing::debug!(key = %key, generation = %generation, "Superseded fetch result dropped");
                return Ok(entry.written_since(generation).unwrap_or(value));
            }

            entry.snapshot = Some(Snapshot {
                value: value.clone(),
                fetched_at: Instant::now(),
            });
            if entry
                .invalidated_at
                .is_some_and(|boundary| generation.is_newer_than(&boundary))
            {
                entry.invalidated_at = None;
            }
            tracing::debug!(key = %key, generation = %generation, "Fetch committed");
            self.emit(CacheEvent::Updated { key: key.clone() });
            Ok(value)
        }
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl<F: ResourceFetcher> Clone for RemoteCache<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
