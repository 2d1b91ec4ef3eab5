//! Dataset generation numbering.
//!
//! A generation is a monotonically increasing integer versioning the dataset
//! snapshot. It is bumped exactly once per completed ingestion batch, never
//! decreases, and is never reused, which lets the engine detect staleness
//! with a single integer comparison instead of payload inspection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dataset generation number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Create a generation with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The generation before any ingestion batch has completed.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Get the raw generation number.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Check whether this generation is behind another.
    pub fn is_behind(&self, other: Generation) -> bool {
        self.0 < other.0
    }

    /// The generation `retention` steps back, saturating at zero.
    ///
    /// Used to compute the eviction cutoff: entries older than
    /// `current.retained_floor(1)` are reclaimable while the most recent
    /// superseded generation stays servable.
    pub fn retained_floor(&self, retention: u64) -> Self {
        Self(self.0.saturating_sub(retention))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
