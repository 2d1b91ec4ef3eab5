//! Core data types for the VITRINE catalog cache engine.
//!
//! This crate defines the vocabulary shared by the engine and its callers:
//! validated cache keys, cached entries with generation/TTL metadata, the
//! dataset generation number, the ingestion-completion signal, the error
//! taxonomy, and engine configuration. It contains no I/O and no caching
//! logic; the engine itself lives in `vitrine-cache`.

pub mod config;
pub mod entry;
pub mod error;
pub mod generation;
pub mod key;
pub mod signal;
pub mod stats;

pub use config::{EngineConfig, RefreshMode, RetryConfig};
pub use entry::{CacheEntry, CachedValue, EntryState};
pub use error::{CacheError, CacheResult};
pub use generation::Generation;
pub use key::{CacheKey, MAX_KEY_BYTES};
pub use signal::IngestionComplete;
pub use stats::{EngineHealth, EngineStats};
