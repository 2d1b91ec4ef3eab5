//! Ingestion-completion listener.
//!
//! The catalog pipeline emits an [`IngestionComplete`] signal once per
//! finished batch. The listener turns each distinct signal into exactly one
//! generation bump: signals are at-least-once, so a bounded history of
//! recent batch ids suppresses redeliveries. Losing a very old batch id
//! from the history is harmless because a redelivery that late causes one
//! extra bump, which is safe, never incorrect.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use vitrine_core::IngestionComplete;

use crate::backing::BackingStore;
use crate::engine::CacheEngine;

/// Bounded memory of recently applied batch ids.
#[derive(Debug)]
pub struct BatchHistory {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl BatchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record a batch id. Returns false if it was already recorded,
    /// evicting the oldest remembered id once at capacity.
    pub fn record(&mut self, batch_id: &str) -> bool {
        if self.seen.contains(batch_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(batch_id.to_string());
        self.seen.insert(batch_id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Snapshot of the listener's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Signals received, duplicates included.
    pub signals_received: u64,
    /// Signals that advanced the generation.
    pub signals_applied: u64,
    /// Redelivered signals suppressed by the batch history.
    pub duplicates_suppressed: u64,
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    signals_received: AtomicU64,
    signals_applied: AtomicU64,
    duplicates_suppressed: AtomicU64,
}

impl ListenerMetrics {
    pub fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            signals_received: self.signals_received.load(Ordering::Relaxed),
            signals_applied: self.signals_applied.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
        }
    }
}

/// Background task consuming ingestion signals until shutdown.
///
/// Runs until the shutdown flag flips, the shutdown sender drops, or the
/// signal channel closes. The caller spawns it:
///
/// ```ignore
/// let (signal_tx, signal_rx) = mpsc::channel(64);
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let metrics = Arc::new(ListenerMetrics::default());
/// let handle = tokio::spawn(ingest_listener_task(
///     engine.clone(),
///     signal_rx,
///     shutdown_rx,
///     Arc::clone(&metrics),
/// ));
/// ```
pub async fn ingest_listener_task<B: BackingStore>(
    engine: CacheEngine<B>,
    mut signals: mpsc::Receiver<IngestionComplete>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<ListenerMetrics>,
) {
    let mut history = BatchHistory::new(engine.config().batch_history);
    info!(
        batch_history = engine.config().batch_history,
        "ingestion listener started"
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("ingestion listener shutting down");
                    break;
                }
            }
            signal = signals.recv() => {
                match signal {
                    Some(signal) => apply_signal(&engine, &mut history, &metrics, signal),
                    None => {
                        info!("signal channel closed, ingestion listener stopping");
                        break;
                    }
                }
            }
        }
    }
}

fn apply_signal<B: BackingStore>(
    engine: &CacheEngine<B>,
    history: &mut BatchHistory,
    metrics: &ListenerMetrics,
    signal: IngestionComplete,
) {
    metrics.signals_received.fetch_add(1, Ordering::Relaxed);

    if !history.record(&signal.batch_id) {
        metrics.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
        debug!(batch_id = %signal.batch_id, "duplicate ingestion signal suppressed");
        return;
    }

    let generation = engine.on_generation_bump();
    metrics.signals_applied.fetch_add(1, Ordering::Relaxed);
    info!(
        batch_id = %signal.batch_id,
        record_count = signal.record_count,
        generation = %generation,
        "ingestion batch applied"
    );
}

// =============================================================================
// TESTS
// =============================================================================
