//! Engine statistics and health reporting types.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the engine's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Reads served directly from a fresh entry.
    pub hits: u64,
    /// Reads that found no cached entry at all.
    pub misses: u64,
    /// Reads that landed on a stale positive entry, whether served the
    /// stale value or blocked on its refresh.
    pub stale_served: u64,
    /// Reads that joined an already in-flight refresh instead of fetching.
    pub coalesced: u64,
    /// Completed backing-store refreshes.
    pub refreshes: u64,
    /// Refreshes that ended in an error (timeout or unavailable).
    pub refresh_failures: u64,
    /// Fresh reads answered from a negative (not-found) entry.
    pub negative_hits: u64,
    /// Entries removed by generation sweeps.
    pub evictions: u64,
}

impl EngineStats {
    /// Hit rate over fresh-servable reads (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Health accessor payload for the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHealth {
    /// Current dataset generation.
    pub current_generation: u64,
    /// Entries currently cached (positive and negative).
    pub entry_count: u64,
    /// Refresh fetches currently in flight.
    pub pending_refreshes: u64,
    /// Hit rate since startup.
    pub hit_rate: f64,
}

// =============================================================================
// TESTS
// =============================================================================
