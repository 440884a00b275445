use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::concurrency_level;

/// Shared mutable state for one download run.
///
/// Fetch tasks run in parallel; chunk bookkeeping goes through the mutex and
/// attempt counters through atomics, so every mutation is atomic without the
/// engine serializing its workers.
#[derive(Debug, Default)]
pub struct Coordinator {
    chunks: Mutex<ChunkState>,
    attempted: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Default)]
struct ChunkState {
    validated: BTreeSet<u32>,
    sizes: HashMap<u32, u64>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_validated(&self, index: u32) -> bool {
        self.chunks.lock().validated.contains(&index)
    }

    /// Record that the chunk file for `index` is on disk and hash-verified.
    pub fn mark_validated(&self, index: u32, size: u64) {
        let mut state = self.chunks.lock();
        state.validated.insert(index);
        state.sizes.insert(index, size);
    }

    /// Record streamed byte progress for a chunk that has not validated
    /// yet. Overwritten by [`mark_validated`](Self::mark_validated) once the
    /// chunk is on disk; reset to zero when an attempt fails.
    pub fn set_size(&self, index: u32, size: u64) {
        self.chunks.lock().sizes.insert(index, size);
    }

    pub fn snapshot_validated(&self) -> BTreeSet<u32> {
        self.chunks.lock().validated.clone()
    }

    pub fn snapshot_sizes(&self) -> HashMap<u32, u64> {
        self.chunks.lock().sizes.clone()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.chunks.lock().sizes.values().sum()
    }

    pub fn completed_chunks(&self) -> u32 {
        self.chunks.lock().validated.len() as u32
    }

    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Concurrency level for the next launch, from the observed failure
    /// ratio.
    pub fn current_level(&self) -> usize {
        concurrency_level(self.attempts(), self.failures())
    }
}
