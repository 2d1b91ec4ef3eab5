//! Dataset version tracker.
//!
//! Holds the current generation as a single atomic counter. Readers take a
//! snapshot once per operation and compare against entry generations; the
//! listener is the only logical writer. No locks anywhere on this path.

use std::sync::atomic::{AtomicU64, Ordering};

use vitrine_core::Generation;

/// Process-wide generation counter.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU64,
}

impl GenerationCounter {
    /// Create a counter at generation zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counter starting at the given generation.
    ///
    /// Useful when an instance rejoins a fleet that shares a persisted
    /// generation counter.
    pub fn starting_at(generation: Generation) -> Self {
        Self {
            current: AtomicU64::new(generation.value()),
        }
    }

    /// Current generation. Lock-free; callers snapshot once per operation
    /// rather than re-reading mid-operation.
    pub fn current(&self) -> Generation {
        Generation::new(self.current.load(Ordering::Acquire))
    }

    /// Atomically advance to the next generation and return it.
    pub fn bump(&self) -> Generation {
        Generation::new(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

// =============================================================================
// TESTS
// =============================================================================
