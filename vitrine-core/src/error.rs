//! Error types for VITRINE cache operations

use thiserror::Error;

/// Errors surfaced by the cache engine and its backing store adapter.
///
/// All variants are `Clone` so a single failure can resolve every waiter
/// coalesced onto the same refresh with an identical error. Messages carry
/// no internal engine state (lock identities, generation numbers).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The key definitively does not exist in the backing store.
    ///
    /// Distinct from a cache miss: the backing store was consulted and
    /// answered. The engine records this as a short-lived negative entry.
    #[error("Record not found: {key}")]
    NotFound { key: String },

    /// The backing store could not be reached.
    ///
    /// Emitted only after the adapter has exhausted its bounded retries;
    /// transient failures never leak out mid-retry.
    #[error("Backing store unavailable after {attempts} attempts: {reason}")]
    BackingUnavailable { reason: String, attempts: u32 },

    /// A refresh fetch exceeded its deadline.
    #[error("Refresh timed out for {key} after {elapsed_ms}ms")]
    RefreshTimeout { key: String, elapsed_ms: u64 },

    /// The key was malformed and rejected before any lookup.
    ///
    /// Caller error; never retried.
    #[error("Invalid cache key: {reason}")]
    InvalidKey { reason: String },
}

impl CacheError {
    /// Whether the adapter may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackingUnavailable { .. })
    }

    /// Whether this error represents definitive absence rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for VITRINE operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
