//! Ingestion-completion signal consumed by the invalidation listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signal emitted by the ingestion pipeline when a batch finishes loading.
///
/// Delivery is at-least-once; the listener deduplicates by `batch_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionComplete {
    /// Identifier of the completed batch, unique per logical ingestion cycle.
    pub batch_id: String,
    /// Number of records loaded by the batch.
    pub record_count: u64,
    /// When the batch completed.
    pub completed_at: DateTime<Utc>,
}

impl IngestionComplete {
    /// Create a signal completed now.
    pub fn new(batch_id: impl Into<String>, record_count: u64) -> Self {
        Self {
            batch_id: batch_id.into(),
            record_count,
            completed_at: Utc::now(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
