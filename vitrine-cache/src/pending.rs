//! Per-key refresh coalescing.
//!
//! At most one fetch is in flight per key: the first caller to miss becomes
//! the leader and owns the fetch, concurrent callers become followers and
//! await the leader's outcome over a watch channel. Leases carry a unique id
//! so an invalidation can supersede an in-flight refresh without the stale
//! leader later writing its result back.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;

use vitrine_core::{CacheEntry, CacheKey, CacheResult};

/// Outcome delivered to followers of a coalesced refresh.
pub type RefreshOutcome<V> = CacheResult<CacheEntry<V>>;

/// Ownership of an in-flight refresh for one key.
///
/// The holder must eventually pass the lease to
/// [`PendingRefreshes::complete`]; dropping it unresolved wakes followers
/// with no outcome and they fall back to their own read attempt.
#[derive(Debug)]
pub struct RefreshLease<V> {
    key: CacheKey,
    id: u64,
    tx: watch::Sender<Option<RefreshOutcome<V>>>,
}

impl<V> RefreshLease<V> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Observe this lease's outcome. Lets a leader hand the lease to a
    /// spawned task and await the result like any follower.
    pub fn subscribe(&self) -> watch::Receiver<Option<RefreshOutcome<V>>> {
        self.tx.subscribe()
    }
}

/// Result of attempting to join an in-flight refresh.
#[derive(Debug)]
pub enum Joined<V> {
    /// No refresh was in flight; the caller now owns one.
    Leader(RefreshLease<V>),
    /// A refresh is already in flight; await its outcome.
    Follower(watch::Receiver<Option<RefreshOutcome<V>>>),
}

/// Table of in-flight refreshes, one slot per key.
#[derive(Debug)]
pub struct PendingRefreshes<V> {
    slots: DashMap<CacheKey, Slot<V>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Slot<V> {
    id: u64,
    rx: watch::Receiver<Option<RefreshOutcome<V>>>,
}

impl<V> Default for PendingRefreshes<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> PendingRefreshes<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the refresh in flight for `key`, or lead a new one.
    pub fn join_or_lead(&self, key: &CacheKey) -> Joined<V> {
        match self.slots.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                Joined::Follower(occupied.get().rx.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot { id, rx });
                Joined::Leader(RefreshLease {
                    key: key.clone(),
                    id,
                    tx,
                })
            }
        }
    }

    /// Deliver a leader's outcome to its followers and release the slot.
    ///
    /// Returns whether the lease was still current. A superseded lease
    /// (its slot cleared or replaced by an invalidation) still wakes its
    /// followers, but the caller must not write its result to the store.
    pub fn complete(&self, lease: RefreshLease<V>, outcome: RefreshOutcome<V>) -> bool {
        let current = self
            .slots
            .remove_if(&lease.key, |_, slot| slot.id == lease.id)
            .is_some();
        let _ = lease.tx.send(Some(outcome));
        current
    }

    /// Drop the slot for `key` so the next reader starts a fresh fetch.
    /// The superseded leader, if any, keeps running but its result is
    /// discarded at [`complete`](Self::complete).
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Drop every slot. In-flight leaders keep running and still wake their
    /// followers, but their results are discarded at
    /// [`complete`](Self::complete). Returns the number of slots dropped.
    pub fn invalidate_all(&self) -> u64 {
        let keys: Vec<CacheKey> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        keys.into_iter()
            .filter(|key| self.slots.remove(key).is_some())
            .count() as u64
    }

    /// Drop slots whose key starts with `prefix`, superseding their leaders.
    pub fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let keys: Vec<CacheKey> = self
            .slots
            .iter()
            .filter(|slot| slot.key().as_ref().starts_with(prefix))
            .map(|slot| slot.key().clone())
            .collect();
        keys.into_iter()
            .filter(|key| self.slots.remove(key).is_some())
            .count() as u64
    }

    /// Drop the slot for `key` if its leader is gone without resolving.
    /// Lets a follower that observed a dead channel lead its own retry.
    pub fn reclaim_dead(&self, key: &CacheKey) -> bool {
        self.slots
            .remove_if(key, |_, slot| slot.rx.has_changed().is_err())
            .is_some()
    }

    /// Number of refreshes currently in flight.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Await the outcome of a joined refresh.
///
/// Returns `None` when the leader dropped its lease unresolved; the caller
/// should retry the read itself.
pub async fn await_outcome<V: Clone>(
    mut rx: watch::Receiver<Option<RefreshOutcome<V>>>,
) -> Option<RefreshOutcome<V>> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().as_ref() {
            return Some(outcome.clone());
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
