//! Keyed storage for cached entries.
//!
//! The store is a sharded concurrent map: the hit path takes only a shard
//! read lock for the duration of a clone, and eviction sweeps work in capped
//! batches so they never hold up foreground reads. The store never touches
//! the backing store.

use std::time::Duration;

use dashmap::DashMap;

use vitrine_core::{CacheEntry, CacheKey, CachedValue, Generation};

/// Concurrent entry store owning all cached entries.
#[derive(Debug)]
pub struct EntryStore<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
}

impl<V> Default for EntryStore<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> EntryStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry. O(1) expected; never blocks on I/O.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Store an entry, overwriting any existing one with `stored_at = now`.
    ///
    /// A key's stored generation never decreases: a write carrying an older
    /// generation than the resident entry is dropped. Writes within the same
    /// generation are last-write-wins.
    pub fn put(&self, key: CacheKey, value: CachedValue<V>, generation: Generation, ttl: Duration) {
        let entry = CacheEntry::new(value, generation, ttl);
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if !generation.is_behind(occupied.get().generation) {
                    occupied.insert(entry);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
    }

    /// Remove an entry. Returns whether one was present; no-op otherwise.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> u64 {
        let removed = self.entries.len() as u64;
        self.entries.clear();
        removed
    }

    /// Remove entries whose key starts with `prefix`. Returns the number
    /// removed.
    pub fn remove_prefix(&self, prefix: &str) -> u64 {
        let victims: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().as_ref().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        victims
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count() as u64
    }

    /// Number of cached entries (positive and negative).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove up to `limit` entries whose generation is behind `before`.
    ///
    /// Returns the number removed and whether the sweep is complete. The
    /// per-entry re-check on removal tolerates a concurrent refresh landing
    /// between the scan and the removal.
    pub fn sweep_once(&self, before: Generation, limit: usize) -> (u64, bool) {
        let victims: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.generation.is_behind(before))
            .map(|entry| entry.key().clone())
            .take(limit)
            .collect();

        let exhausted = victims.len() < limit;
        let mut removed = 0u64;
        for key in victims {
            if self
                .entries
                .remove_if(&key, |_, entry| entry.generation.is_behind(before))
                .is_some()
            {
                removed += 1;
            }
        }
        (removed, exhausted)
    }

    /// Remove all entries whose generation is behind `before`, in capped
    /// batches, yielding to the scheduler between batches so the sweep never
    /// starves foreground reads.
    pub async fn evict_generation_before(&self, before: Generation, batch_size: usize) -> u64 {
        let batch_size = batch_size.max(1);
        let mut total = 0u64;
        loop {
            let (removed, exhausted) = self.sweep_once(before, batch_size);
            total += removed;
            if exhausted {
                break;
            }
            tokio::task::yield_now().await;
        }
        total
    }
}

// =============================================================================
// TESTS
// =============================================================================
