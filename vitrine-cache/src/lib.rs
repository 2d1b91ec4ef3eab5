//! Caching and invalidation engine for the VITRINE catalog service.
//!
//! The catalog dataset is replaced wholesale by periodic ingestion runs, so
//! freshness is tracked per dataset, not per record: a single monotonic
//! generation number advances once per completed ingestion batch, and every
//! cached entry remembers the generation it was fetched under. An entry is
//! fresh when its generation matches the current one and its TTL has not
//! lapsed; anything else is stale and triggers a coalesced refresh from the
//! backing store.
//!
//! # Components
//!
//! - [`CacheEngine`]: the read path. Routes on entry state, coalesces
//!   concurrent refreshes per key, caches absences, and serves stale values
//!   per [`RefreshMode`](vitrine_core::RefreshMode).
//! - [`BackingStore`]: the source-of-truth trait callers implement, wrapped
//!   with bounded retry by [`RetryingStore`].
//! - [`ingest_listener_task`]: consumes ingestion-completion signals,
//!   deduplicates redeliveries, and advances the generation.
//!
//! Shared vocabulary types (keys, entries, errors, configuration) live in
//! `vitrine-core`.

pub mod backing;
pub mod engine;
pub mod listener;
pub mod pending;
pub mod store;
pub mod version;

pub use backing::{BackingStore, RetryingStore};
pub use engine::{CacheEngine, CacheRead, EngineMetrics, ReadSource};
pub use listener::{ingest_listener_task, BatchHistory, ListenerMetrics, ListenerStats};
pub use pending::{Joined, PendingRefreshes, RefreshLease, RefreshOutcome};
pub use store::EntryStore;
pub use version::GenerationCounter;
