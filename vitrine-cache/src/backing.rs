//! Backing store adapter.
//!
//! The engine reads records through [`BackingStore`], and the adapter wraps
//! any implementation with bounded retry and exponential backoff. Retries
//! apply only to transient faults: a missing record and a rejected key are
//! definitive answers and are surfaced on the first attempt.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use vitrine_core::{CacheError, CacheKey, CacheResult, RetryConfig};

/// Source of truth for cached records.
///
/// A missing record is reported as [`CacheError::NotFound`] so the engine
/// can cache the absence. Transient faults are reported as
/// [`CacheError::BackingUnavailable`].
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// The record type this store produces.
    type Value: Clone + Send + Sync + 'static;

    /// Fetch the record for `key` from the source of truth.
    async fn fetch(&self, key: &CacheKey) -> CacheResult<Self::Value>;
}

#[async_trait]
impl<B: BackingStore> BackingStore for Arc<B> {
    type Value = B::Value;

    async fn fetch(&self, key: &CacheKey) -> CacheResult<Self::Value> {
        (**self).fetch(key).await
    }
}

/// Wraps a [`BackingStore`] with bounded retry and exponential backoff.
#[derive(Debug)]
pub struct RetryingStore<B> {
    inner: B,
    retry: RetryConfig,
}

impl<B: BackingStore> RetryingStore<B> {
    pub fn new(inner: B, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    /// Fetch with up to `max_retries` additional attempts on retryable
    /// errors. The reported attempt count covers every attempt made.
    pub async fn fetch(&self, key: &CacheKey) -> CacheResult<B::Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fetch(key).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(key = %key, attempt, "backing fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt <= self.retry.max_retries => {
                    let backoff = self.retry.backoff_for(attempt - 1);
                    warn!(
                        key = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "backing fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(CacheError::BackingUnavailable { reason, .. }) => {
                    error!(key = %key, attempts = attempt, reason = %reason, "backing store unavailable, retries exhausted");
                    return Err(CacheError::BackingUnavailable {
                        reason,
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
