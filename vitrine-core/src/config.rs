//! Engine and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default entry TTL in seconds (matches the catalog's hourly refresh cadence).
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 3600;
/// Default negative-cache TTL in seconds.
pub const DEFAULT_NEGATIVE_TTL_SECS: u64 = 30;
/// Default backing-store fetch deadline in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
/// Default number of superseded generations kept servable.
pub const DEFAULT_GENERATION_RETENTION: u64 = 1;
/// Default entries removed per eviction quantum.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 256;
/// Default number of recent batch ids remembered for dedup.
pub const DEFAULT_BATCH_HISTORY: usize = 64;

/// How the engine resolves a read that lands on a stale entry.
///
/// A single policy knob, not two engines: both modes share the same refresh
/// and coalescing machinery and differ only in what the caller gets while a
/// refresh is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Wait for the refresh and return the fresh value.
    Block,
    /// Return the stale value immediately while a refresh proceeds in the
    /// background.
    #[default]
    ServeStaleThenRefresh,
}

/// Retry policy for the backing store adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff to apply before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let backoff = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }
}

/// Configuration for the cache engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Policy for reads that hit a stale entry.
    pub refresh_mode: RefreshMode,
    /// Serve an existing stale value instead of a refresh failure.
    pub serve_stale_on_error: bool,
    /// TTL for positive entries.
    pub entry_ttl: Duration,
    /// TTL for negative (not-found) entries.
    pub negative_ttl: Duration,
    /// Deadline for a single backing-store fetch, retries included.
    pub fetch_timeout: Duration,
    /// How many superseded generations stay servable before eviction.
    pub generation_retention: u64,
    /// Entries removed per eviction quantum; sweeps yield between quanta.
    pub eviction_batch_size: usize,
    /// Recent batch ids remembered by the listener for dedup.
    pub batch_history: usize,
    /// Retry policy for the backing store adapter.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_mode: RefreshMode::ServeStaleThenRefresh,
            serve_stale_on_error: true,
            entry_ttl: Duration::from_secs(DEFAULT_ENTRY_TTL_SECS),
            negative_ttl: Duration::from_secs(DEFAULT_NEGATIVE_TTL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            generation_retention: DEFAULT_GENERATION_RETENTION,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            batch_history: DEFAULT_BATCH_HISTORY,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `VITRINE_REFRESH_MODE`: `block` or `serve_stale` (default: serve_stale)
    /// - `VITRINE_SERVE_STALE_ON_ERROR`: fall back to stale on refresh failure (default: true)
    /// - `VITRINE_ENTRY_TTL_SECS`: positive entry TTL (default: 3600)
    /// - `VITRINE_NEGATIVE_TTL_SECS`: negative entry TTL (default: 30)
    /// - `VITRINE_FETCH_TIMEOUT_SECS`: backing fetch deadline (default: 5)
    /// - `VITRINE_GENERATION_RETENTION`: superseded generations kept (default: 1)
    /// - `VITRINE_EVICTION_BATCH_SIZE`: entries per sweep quantum (default: 256)
    /// - `VITRINE_BATCH_HISTORY`: batch ids remembered for dedup (default: 64)
    pub fn from_env() -> Self {
        let refresh_mode = match std::env::var("VITRINE_REFRESH_MODE").ok().as_deref() {
            Some("block") => RefreshMode::Block,
            _ => RefreshMode::ServeStaleThenRefresh,
        };

        let serve_stale_on_error = std::env::var("VITRINE_SERVE_STALE_ON_ERROR")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let entry_ttl = Duration::from_secs(
            std::env::var("VITRINE_ENTRY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ENTRY_TTL_SECS),
        );

        let negative_ttl = Duration::from_secs(
            std::env::var("VITRINE_NEGATIVE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_NEGATIVE_TTL_SECS),
        );

        let fetch_timeout = Duration::from_secs(
            std::env::var("VITRINE_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        );

        let generation_retention = std::env::var("VITRINE_GENERATION_RETENTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_GENERATION_RETENTION);

        let eviction_batch_size = std::env::var("VITRINE_EVICTION_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVICTION_BATCH_SIZE);

        let batch_history = std::env::var("VITRINE_BATCH_HISTORY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BATCH_HISTORY);

        Self {
            refresh_mode,
            serve_stale_on_error,
            entry_ttl,
            negative_ttl,
            fetch_timeout,
            generation_retention,
            eviction_batch_size,
            batch_history,
            retry: RetryConfig::default(),
        }
    }

    /// Configuration for development/testing with short TTLs and deadlines.
    pub fn development() -> Self {
        Self {
            entry_ttl: Duration::from_secs(60),
            negative_ttl: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(1),
            eviction_batch_size: 16,
            batch_history: 8,
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Configuration for production with conservative deadlines.
    pub fn production() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Set the refresh mode.
    pub fn with_refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    /// Enable or disable stale fallback on refresh failure.
    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    /// Set the positive entry TTL.
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the negative entry TTL.
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Set the backing fetch deadline.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
