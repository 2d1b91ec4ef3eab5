//! Cached entry representation and freshness classification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::generation::Generation;

/// The payload held by a cache entry.
///
/// `NotFound` records a definitive backing-store absence (negative caching)
/// so repeated reads for a missing record do not hammer the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue<V> {
    /// A value fetched from the backing store.
    Found(V),
    /// The backing store reported the key absent.
    NotFound,
}

impl<V> CachedValue<V> {
    /// Whether this is a negative (not-found) payload.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Classification of an entry relative to the current generation and its TTL.
///
/// In-flight refreshes are tracked by the engine's pending-refresh table, not
/// on the entry itself, so there is no `Pending` state here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Current generation and within TTL; servable without I/O.
    Fresh,
    /// Superseded generation or expired TTL; servable only under the
    /// stale-fallback policy.
    Stale,
}

/// A single cached record with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached payload (or a negative marker).
    pub value: CachedValue<V>,
    /// Dataset generation this payload was fetched under.
    pub generation: Generation,
    /// When the payload was stored.
    pub stored_at: DateTime<Utc>,
    /// Time-to-live after which the entry is stale even within its generation.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create an entry stored now.
    pub fn new(value: CachedValue<V>, generation: Generation, ttl: Duration) -> Self {
        Self {
            value,
            generation,
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// Age of the entry.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Whether this entry holds a negative (not-found) payload.
    pub fn is_negative(&self) -> bool {
        self.value.is_negative()
    }

    /// Classify this entry against the current generation.
    ///
    /// Fresh iff the entry's generation matches and the TTL has not elapsed.
    /// An entry from a superseded generation is Stale regardless of TTL.
    pub fn state(&self, current: Generation) -> EntryState {
        if self.generation == current && !self.is_expired() {
            EntryState::Fresh
        } else {
            EntryState::Stale
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
