//! The cache engine.
//!
//! This module ties the entry store, the generation counter, the pending
//! refresh table, and the backing store adapter into the read path. Reads
//! route on entry state: fresh entries are returned directly, stale entries
//! are either served while a refresh proceeds in the background or held
//! until the refresh lands, depending on [`RefreshMode`]. At most one fetch
//! per key is ever in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use vitrine_core::{
    CacheEntry, CacheError, CacheKey, CacheResult, CachedValue, EngineConfig, EngineHealth,
    EngineStats, EntryState, Generation, RefreshMode,
};

use crate::backing::{BackingStore, RetryingStore};
use crate::pending::{await_outcome, Joined, PendingRefreshes, RefreshLease, RefreshOutcome};
use crate::store::EntryStore;
use crate::version::GenerationCounter;

/// Where a read's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// A fresh cached entry.
    Fresh,
    /// A stale cached entry, served while or because a refresh could not
    /// provide a fresh value.
    Stale,
    /// A backing-store fetch this read led.
    Refreshed,
    /// A backing-store fetch this read joined.
    Coalesced,
}

/// A successful read, carrying provenance the caller can act on.
#[derive(Debug, Clone)]
pub struct CacheRead<V> {
    /// The value.
    pub value: V,
    /// Generation the value was cached under.
    pub generation: Generation,
    /// Where the value came from.
    pub source: ReadSource,
}

impl<V> CacheRead<V> {
    /// Whether this read was served from a stale entry.
    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::Stale
    }

    /// Consume the read and return the value.
    pub fn into_value(self) -> V {
        self.value
    }
}

/// Engine counters. All increments are relaxed; snapshots are advisory.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    coalesced: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    negative_hits: AtomicU64,
    evictions: AtomicU64,
}

impl EngineMetrics {
    /// Snapshot the counters.
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

struct Inner<B: BackingStore> {
    config: EngineConfig,
    store: EntryStore<B::Value>,
    pending: PendingRefreshes<B::Value>,
    backing: RetryingStore<B>,
    generations: GenerationCounter,
    metrics: EngineMetrics,
}

/// Read cache over a backing store, invalidated by dataset generation.
///
/// The engine is cheap to clone; clones share all state. Refresh fetches
/// run in spawned tasks, so a caller abandoning a read never cancels the
/// fetch other callers are waiting on.
///
/// # Example
///
/// ```ignore
/// let engine = CacheEngine::new(backing, EngineConfig::default());
///
/// let key = CacheKey::for_query("catalog", [("brand", Some("acme".into()))])?;
/// let read = engine.read(&key).await?;
/// if read.is_stale() {
///     // a refresh is already in flight
/// }
/// ```
pub struct CacheEngine<B: BackingStore> {
    inner: Arc<Inner<B>>,
}

impl<B: BackingStore> Clone for CacheEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BackingStore> CacheEngine<B> {
    /// Create an engine over `backing`.
    pub fn new(backing: B, config: EngineConfig) -> Self {
        let retry = config.retry.clone();
        Self {
            inner: Arc::new(Inner {
                store: EntryStore::new(),
                pending: PendingRefreshes::new(),
                backing: RetryingStore::new(backing, retry),
                generations: GenerationCounter::new(),
                metrics: EngineMetrics::default(),
                config,
            }),
        }
    }

    /// Create an engine with default configuration.
    pub fn with_defaults(backing: B) -> Self {
        Self::new(backing, EngineConfig::default())
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current dataset generation.
    pub fn current_generation(&self) -> Generation {
        self.inner.generations.current()
    }

    /// Read the value for `key`, fetching from the backing store as needed.
    ///
    /// A cached absence returns [`CacheError::NotFound`] without touching
    /// the backing store. Must be called within a Tokio runtime.
    pub async fn read(&self, key: &CacheKey) -> CacheResult<CacheRead<B::Value>> {
        // One retry after observing an abandoned refresh slot. Only the
        // first pass updates the read counters.
        for attempt in 0..2 {
            match self.read_attempt(key, attempt == 0).await? {
                Some(read) => return Ok(read),
                None => {
                    self.inner.pending.reclaim_dead(key);
                }
            }
        }
        Err(CacheError::BackingUnavailable {
            reason: "refresh abandoned before resolving".to_string(),
            attempts: 2,
        })
    }

    /// One pass of the read path. `None` means the refresh this read was
    /// waiting on was abandoned and the caller should retry.
    async fn read_attempt(
        &self,
        key: &CacheKey,
        count_metrics: bool,
    ) -> CacheResult<Option<CacheRead<B::Value>>> {
        let inner = &self.inner;
        // One generation snapshot per read; any refresh this read leads is
        // stamped with it, not with whatever the counter says later.
        let current = inner.generations.current();

        // Only a positive stale entry is eligible as an error fallback.
        // A stale absence proves nothing about the current generation.
        let mut stale_fallback: Option<CacheEntry<B::Value>> = None;

        match inner.store.get(key) {
            Some(entry) => {
                if entry.state(current) == EntryState::Fresh {
                    return match entry.value {
                        CachedValue::Found(value) => {
                            inner.metrics.hits.fetch_add(1, Ordering::Relaxed);
                            Ok(Some(CacheRead {
                                value,
                                generation: entry.generation,
                                source: ReadSource::Fresh,
                            }))
                        }
                        CachedValue::NotFound => {
                            inner.metrics.negative_hits.fetch_add(1, Ordering::Relaxed);
                            Err(CacheError::NotFound {
                                key: key.to_string(),
                            })
                        }
                    };
                }

                if let CachedValue::Found(value) = &entry.value {
                    if inner.config.refresh_mode == RefreshMode::ServeStaleThenRefresh {
                        self.ensure_refresh(key);
                        inner.metrics.stale_served.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, generation = %entry.generation, "serving stale while revalidating");
                        return Ok(Some(CacheRead {
                            value: value.clone(),
                            generation: entry.generation,
                            source: ReadSource::Stale,
                        }));
                    }
                    // Blocked on the refresh; counts as a stale encounter,
                    // not a miss, since an entry was present.
                    if count_metrics {
                        inner.metrics.stale_served.fetch_add(1, Ordering::Relaxed);
                    }
                    stale_fallback = Some(entry);
                }
            }
            None => {
                if count_metrics {
                    inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let (outcome, source) = match inner.pending.join_or_lead(key) {
            Joined::Leader(lease) => {
                let rx = lease.subscribe();
                tokio::spawn(run_refresh(Arc::clone(inner), lease, current));
                (await_outcome(rx).await, ReadSource::Refreshed)
            }
            Joined::Follower(rx) => {
                inner.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                (await_outcome(rx).await, ReadSource::Coalesced)
            }
        };

        let Some(outcome) = outcome else {
            return Ok(None);
        };

        match outcome {
            Ok(entry) => match entry.value {
                CachedValue::Found(value) => Ok(Some(CacheRead {
                    value,
                    generation: entry.generation,
                    source,
                })),
                CachedValue::NotFound => Err(CacheError::NotFound {
                    key: key.to_string(),
                }),
            },
            Err(err) => {
                if inner.config.serve_stale_on_error {
                    if let Some(entry) = stale_fallback {
                        if let CachedValue::Found(value) = entry.value {
                            warn!(key = %key, error = %err, "refresh failed, serving stale value");
                            return Ok(Some(CacheRead {
                                value,
                                generation: entry.generation,
                                source: ReadSource::Stale,
                            }));
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Start a background refresh for `key` unless one is already in flight.
    fn ensure_refresh(&self, key: &CacheKey) {
        if let Joined::Leader(lease) = self.inner.pending.join_or_lead(key) {
            let generation = self.inner.generations.current();
            tokio::spawn(run_refresh(Arc::clone(&self.inner), lease, generation));
        }
    }

    /// Drop the cached entry for `key` and supersede any in-flight refresh.
    ///
    /// Idempotent. Returns whether anything was dropped. The next read for
    /// the key fetches from the backing store.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.store.remove(key);
        let superseded = self.inner.pending.invalidate(key);
        if removed || superseded {
            debug!(key = %key, superseded, "entry invalidated");
        }
        removed || superseded
    }

    /// Drop every cached entry and supersede all in-flight refreshes.
    ///
    /// Operator escape hatch; the next read of any key is a cold miss.
    /// Returns the number of entries dropped.
    pub fn clear(&self) -> u64 {
        let removed = self.inner.store.clear();
        let superseded = self.inner.pending.invalidate_all();
        info!(removed, superseded, "cache cleared");
        removed
    }

    /// Drop cached entries whose key starts with `prefix` (for example
    /// `"products:"`), superseding their in-flight refreshes.
    ///
    /// Returns the number of entries dropped. Keys outside the prefix are
    /// untouched.
    pub fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let removed = self.inner.store.remove_prefix(prefix);
        let superseded = self.inner.pending.invalidate_prefix(prefix);
        if removed > 0 || superseded > 0 {
            info!(prefix, removed, superseded, "prefix invalidated");
        }
        removed
    }

    /// Advance the dataset generation and start an eviction sweep for
    /// entries that fell out of the retention window.
    ///
    /// Returns the new generation. Entries of older generations become
    /// stale immediately; the sweep reclaims their memory in the
    /// background. Must be called within a Tokio runtime.
    pub fn on_generation_bump(&self) -> Generation {
        let generation = self.inner.generations.bump();
        info!(generation = %generation, "dataset generation advanced");

        let engine = self.clone();
        tokio::spawn(async move {
            engine.sweep_superseded().await;
        });
        generation
    }

    /// Remove entries older than the retention window, in capped batches.
    /// Returns the number removed.
    pub async fn sweep_superseded(&self) -> u64 {
        let inner = &self.inner;
        let cutoff = inner
            .generations
            .current()
            .retained_floor(inner.config.generation_retention);
        let removed = inner
            .store
            .evict_generation_before(cutoff, inner.config.eviction_batch_size)
            .await;
        if removed > 0 {
            inner.metrics.evictions.fetch_add(removed, Ordering::Relaxed);
            info!(cutoff = %cutoff, removed, "evicted superseded entries");
        }
        removed
    }

    /// Snapshot of the engine's counters.
    pub fn stats(&self) -> EngineStats {
        self.inner.metrics.snapshot()
    }

    /// Health payload for the API layer.
    pub fn health(&self) -> EngineHealth {
        let stats = self.stats();
        EngineHealth {
            current_generation: self.inner.generations.current().value(),
            entry_count: self.inner.store.len() as u64,
            pending_refreshes: self.inner.pending.len() as u64,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Leader-side refresh. Runs in its own task so caller cancellation never
/// cancels a fetch that followers are waiting on.
///
/// `generation` was snapshotted before the fetch began. Stamping the result
/// with it means a bump landing mid-fetch leaves the stored entry behind
/// the new generation, so the next read sees it Stale; a fetch that may
/// have observed the pre-batch dataset is never classified Fresh under the
/// post-batch generation.
async fn run_refresh<B: BackingStore>(
    inner: Arc<Inner<B>>,
    lease: RefreshLease<B::Value>,
    generation: Generation,
) {
    let key = lease.key().clone();
    let deadline = inner.config.fetch_timeout;

    let outcome: RefreshOutcome<B::Value> =
        match tokio::time::timeout(deadline, inner.backing.fetch(&key)).await {
            Ok(Ok(value)) => {
                inner.metrics.refreshes.fetch_add(1, Ordering::Relaxed);
                Ok(CacheEntry::new(
                    CachedValue::Found(value),
                    generation,
                    inner.config.entry_ttl,
                ))
            }
            Ok(Err(err)) if err.is_not_found() => {
                inner.metrics.refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "caching absence");
                Ok(CacheEntry::new(
                    CachedValue::NotFound,
                    generation,
                    inner.config.negative_ttl,
                ))
            }
            Ok(Err(err)) => {
                inner.metrics.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "refresh failed");
                Err(err)
            }
            Err(_elapsed) => {
                inner.metrics.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, timeout_ms = deadline.as_millis() as u64, "refresh timed out");
                Err(CacheError::RefreshTimeout {
                    key: key.to_string(),
                    elapsed_ms: deadline.as_millis() as u64,
                })
            }
        };

    let still_current = inner.pending.complete(lease, outcome.clone());
    if still_current {
        if let Ok(entry) = outcome {
            inner
                .store
                .put(key, entry.value, entry.generation, entry.ttl);
        }
    } else {
        debug!(key = %key, "refresh superseded by invalidation, result discarded");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::RwLock;
    use std::time::Duration;
    use vitrine_core::RetryConfig;

    /// Backing store whose contents, latency, and availability the test
    /// controls. Shared with the engine through `Arc`.
    struct ScriptedStore {
        records: RwLock<HashMap<String, String>>,
        calls: AtomicU32,
        delay: Duration,
        unavailable: AtomicBool,
    }

    impl ScriptedStore {
        fn new(records: &[(&str, &str)]) -> Arc<Self> {
            Self::with_delay(records, Duration::ZERO)
        }

        fn with_delay(records: &[(&str, &str)], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                records: RwLock::new(
                    records
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
                delay,
                unavailable: AtomicBool::new(false),
            })
        }

        fn set(&self, key: &str, value: &str) {
            self.records
                .write()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BackingStore for ScriptedStore {
        type Value = String;

        async fn fetch(&self, key: &CacheKey) -> CacheResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(CacheError::BackingUnavailable {
                    reason: "scripted outage".to_string(),
                    attempts: 1,
                });
            }
            match self.records.read().unwrap().get(key.as_ref()) {
                Some(value) => Ok(value.clone()),
                None => Err(CacheError::NotFound {
                    key: key.to_string(),
                }),
            }
        }
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    fn test_config() -> EngineConfig {
        EngineConfig::development().with_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_cold_read_fetches_and_caches() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:all");

        let first = engine.read(&k).await.unwrap();
        assert_eq!(first.value, "v1");
        assert_eq!(first.source, ReadSource::Refreshed);

        let second = engine.read(&k).await.unwrap();
        assert_eq!(second.value, "v1");
        assert_eq!(second.source, ReadSource::Fresh);
        assert_eq!(backing.calls(), 1);

        let stats = engine.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.refreshes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_share_one_fetch() {
        let backing =
            ScriptedStore::with_delay(&[("catalog:all", "v1")], Duration::from_millis(50));
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:all");

        let mut readers = Vec::new();
        for _ in 0..50 {
            let engine = engine.clone();
            let k = k.clone();
            readers.push(tokio::spawn(async move { engine.read(&k).await }));
        }

        for reader in readers {
            let read = reader.await.unwrap().unwrap();
            assert_eq!(read.value, "v1");
        }
        assert_eq!(backing.calls(), 1);
        assert!(engine.stats().coalesced >= 1);
    }

    #[tokio::test]
    async fn test_absence_is_cached() {
        let backing = ScriptedStore::new(&[]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:ghost");

        assert!(engine.read(&k).await.unwrap_err().is_not_found());
        assert!(engine.read(&k).await.unwrap_err().is_not_found());
        assert_eq!(backing.calls(), 1);
        assert_eq!(engine.stats().negative_hits, 1);
    }

    #[tokio::test]
    async fn test_generation_bump_refetches_negative_entry() {
        let backing = ScriptedStore::new(&[]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:late");

        assert!(engine.read(&k).await.unwrap_err().is_not_found());

        // The record appears in a new ingestion run.
        backing.set("catalog:late", "arrived");
        engine.on_generation_bump();

        let read = engine.read(&k).await.unwrap();
        assert_eq!(read.value, "arrived");
        assert_eq!(backing.calls(), 2);
    }

    #[tokio::test]
    async fn test_block_mode_refetches_after_bump() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let config = test_config().with_refresh_mode(RefreshMode::Block);
        let engine = CacheEngine::new(Arc::clone(&backing), config);
        let k = key("catalog:all");

        assert_eq!(engine.read(&k).await.unwrap().value, "v1");

        backing.set("catalog:all", "v2");
        let generation = engine.on_generation_bump();
        assert_eq!(generation, Generation::new(1));

        let read = engine.read(&k).await.unwrap();
        assert_eq!(read.value, "v2");
        assert_eq!(read.generation, Generation::new(1));
        assert_eq!(backing.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_served_while_refresh_lands() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:all");

        assert_eq!(engine.read(&k).await.unwrap().value, "v1");

        backing.set("catalog:all", "v2");
        engine.on_generation_bump();

        // The stale value comes back immediately while a refresh runs.
        let stale = engine.read(&k).await.unwrap();
        assert_eq!(stale.value, "v1");
        assert!(stale.is_stale());

        // The refresh lands and subsequent reads are fresh.
        let fresh = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let read = engine.read(&k).await.unwrap();
                if read.source == ReadSource::Fresh {
                    return read;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(fresh.value, "v2");
        assert_eq!(fresh.generation, Generation::new(1));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        let k = key("catalog:all");

        assert_eq!(engine.read(&k).await.unwrap().value, "v1");
        backing.set("catalog:all", "v2");

        assert!(engine.invalidate(&k));
        assert!(!engine.invalidate(&k));

        let read = engine.read(&k).await.unwrap();
        assert_eq!(read.value, "v2");
        assert_eq!(read.source, ReadSource::Refreshed);
        assert_eq!(backing.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_timeout_surfaces() {
        let backing =
            ScriptedStore::with_delay(&[("catalog:all", "v1")], Duration::from_millis(200));
        let config = test_config()
            .with_fetch_timeout(Duration::from_millis(50))
            .with_serve_stale_on_error(false);
        let engine = CacheEngine::new(Arc::clone(&backing), config);

        let err = engine.read(&key("catalog:all")).await.unwrap_err();
        assert!(matches!(err, CacheError::RefreshTimeout { .. }));
        assert_eq!(engine.stats().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_stale_fallback_on_backing_outage() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let config = test_config().with_refresh_mode(RefreshMode::Block);
        let engine = CacheEngine::new(Arc::clone(&backing), config);
        let k = key("catalog:all");

        assert_eq!(engine.read(&k).await.unwrap().value, "v1");

        engine.on_generation_bump();
        backing.unavailable.store(true, Ordering::SeqCst);

        let read = engine.read(&k).await.unwrap();
        assert_eq!(read.value, "v1");
        assert!(read.is_stale());
    }

    #[tokio::test]
    async fn test_outage_without_fallback_entry_errors() {
        let backing = ScriptedStore::new(&[]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());
        backing.unavailable.store(true, Ordering::SeqCst);

        let err = engine.read(&key("catalog:all")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_sweep_reclaims_superseded_entries() {
        let backing = ScriptedStore::new(&[("catalog:a", "1"), ("catalog:b", "2")]);
        let mut config = test_config();
        config.generation_retention = 0;
        let engine = CacheEngine::new(Arc::clone(&backing), config);

        engine.read(&key("catalog:a")).await.unwrap();
        engine.read(&key("catalog:b")).await.unwrap();
        assert_eq!(engine.health().entry_count, 2);

        engine.on_generation_bump();
        engine.sweep_superseded().await;

        assert_eq!(engine.health().entry_count, 0);
        assert_eq!(engine.health().current_generation, 1);
    }

    #[tokio::test]
    async fn test_retention_keeps_previous_generation() {
        let backing = ScriptedStore::new(&[("catalog:a", "1")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());

        engine.read(&key("catalog:a")).await.unwrap();
        engine.on_generation_bump();
        engine.sweep_superseded().await;

        // Retention of one generation keeps the entry servable as stale.
        assert_eq!(engine.health().entry_count, 1);
        let read = engine.read(&key("catalog:a")).await.unwrap();
        assert!(read.is_stale());
    }

    /// Captures the record before waiting on the gate, like a query that
    /// has already read the pre-ingestion dataset.
    struct GatedStore {
        records: RwLock<HashMap<String, String>>,
        gate: tokio::sync::Semaphore,
        calls: AtomicU32,
    }

    #[async_trait]
    impl BackingStore for GatedStore {
        type Value = String;

        async fn fetch(&self, key: &CacheKey) -> CacheResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let value = self.records.read().unwrap().get(key.as_ref()).cloned();
            let _permit = self.gate.acquire().await.unwrap();
            match value {
                Some(value) => Ok(value),
                None => Err(CacheError::NotFound {
                    key: key.to_string(),
                }),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bump_during_fetch_leaves_entry_stale() {
        let backing = Arc::new(GatedStore {
            records: RwLock::new(
                [("catalog:all".to_string(), "old".to_string())]
                    .into_iter()
                    .collect(),
            ),
            gate: tokio::sync::Semaphore::new(0),
            calls: AtomicU32::new(0),
        });
        let config = test_config()
            .with_refresh_mode(RefreshMode::Block)
            .with_fetch_timeout(Duration::from_secs(5));
        let engine = CacheEngine::new(Arc::clone(&backing), config);
        let k = key("catalog:all");

        let reader = {
            let engine = engine.clone();
            let k = k.clone();
            tokio::spawn(async move { engine.read(&k).await })
        };

        // Wait for the fetch to start, then finish an ingestion run while
        // it is still in flight.
        tokio::time::timeout(Duration::from_secs(2), async {
            while backing.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        engine.on_generation_bump();
        backing
            .records
            .write()
            .unwrap()
            .insert("catalog:all".to_string(), "new".to_string());
        backing.gate.add_permits(10);

        // The in-flight fetch resolves with the pre-bump value stamped at
        // the pre-bump generation, so it is already stale.
        let first = reader.await.unwrap().unwrap();
        assert_eq!(first.value, "old");
        assert_eq!(first.generation, Generation::zero());

        let second = engine.read(&k).await.unwrap();
        assert_eq!(second.value, "new");
        assert_eq!(second.generation, Generation::new(1));
        assert_eq!(backing.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let backing = ScriptedStore::new(&[("products:all", "p"), ("brands:all", "b")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());

        engine.read(&key("products:all")).await.unwrap();
        engine.read(&key("brands:all")).await.unwrap();
        assert_eq!(engine.health().entry_count, 2);

        assert_eq!(engine.clear(), 2);
        assert_eq!(engine.health().entry_count, 0);

        let read = engine.read(&key("products:all")).await.unwrap();
        assert_eq!(read.source, ReadSource::Refreshed);
        assert_eq!(backing.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_prefix_scopes_removal() {
        let backing = ScriptedStore::new(&[
            ("products:all", "p"),
            ("products:brand=acme", "a"),
            ("brands:all", "b"),
        ]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());

        engine.read(&key("products:all")).await.unwrap();
        engine.read(&key("products:brand=acme")).await.unwrap();
        engine.read(&key("brands:all")).await.unwrap();

        assert_eq!(engine.invalidate_prefix("products:"), 2);

        // Keys outside the prefix stay cached.
        let kept = engine.read(&key("brands:all")).await.unwrap();
        assert_eq!(kept.source, ReadSource::Fresh);
        assert_eq!(backing.calls(), 3);

        let dropped = engine.read(&key("products:all")).await.unwrap();
        assert_eq!(dropped.source, ReadSource::Refreshed);
        assert_eq!(backing.calls(), 4);
    }

    #[tokio::test]
    async fn test_stale_blocked_read_is_not_a_miss() {
        let backing = ScriptedStore::new(&[("catalog:all", "v1")]);
        let config = test_config().with_refresh_mode(RefreshMode::Block);
        let engine = CacheEngine::new(Arc::clone(&backing), config);
        let k = key("catalog:all");

        engine.read(&k).await.unwrap();
        backing.set("catalog:all", "v2");
        engine.on_generation_bump();

        let read = engine.read(&k).await.unwrap();
        assert_eq!(read.value, "v2");

        // Only the cold read counts as a miss; the stale-blocked read is
        // accounted as a stale encounter and leaves hit_rate alone.
        let stats = engine.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stale_served, 1);
        assert_eq!(stats.refreshes, 2);
    }

    #[tokio::test]
    async fn test_health_reports_generation_and_counts() {
        let backing = ScriptedStore::new(&[("catalog:a", "1")]);
        let engine = CacheEngine::new(Arc::clone(&backing), test_config());

        engine.read(&key("catalog:a")).await.unwrap();
        engine.read(&key("catalog:a")).await.unwrap();

        let health = engine.health();
        assert_eq!(health.current_generation, 0);
        assert_eq!(health.entry_count, 1);
        assert_eq!(health.pending_refreshes, 0);
        assert!((health.hit_rate - 0.5).abs() < 0.001);
    }
}
