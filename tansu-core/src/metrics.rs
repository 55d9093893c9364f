//! Metrics collection.
//!
//! A cheap shared handle of atomic counters, sampled by operators through
//! `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write path
    cells_applied: AtomicU64,
    bytes_applied: AtomicU64,
    mutation_conflicts: AtomicU64,

    // Durability
    log_writes: AtomicU64,
    log_bytes: AtomicU64,
    log_syncs: AtomicU64,

    // Background work
    fragments_written: AtomicU64,
    compactions: AtomicU64,

    // Read path
    scans: AtomicU64,
    blocks_read: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_apply(&self, cells: u64, bytes: u64) {
        self.inner.cells_applied.fetch_add(cells, Ordering::Relaxed);
        self.inner.bytes_applied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.inner.mutation_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_write(&self, bytes: u64) {
        self.inner.log_writes.fetch_add(1, Ordering::Relaxed);
        self.inner.log_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_log_sync(&self) {
        self.inner.log_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_written(&self) {
        self.inner.fragments_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.inner.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.inner.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_read(&self) {
        self.inner.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cells_applied: self.inner.cells_applied.load(Ordering::Relaxed),
            bytes_applied: self.inner.bytes_applied.load(Ordering::Relaxed),
            mutation_conflicts: self.inner.mutation_conflicts.load(Ordering::Relaxed),
            log_writes: self.inner.log_writes.load(Ordering::Relaxed),
            log_bytes: self.inner.log_bytes.load(Ordering::Relaxed),
            log_syncs: self.inner.log_syncs.load(Ordering::Relaxed),
            fragments_written: self.inner.fragments_written.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
            scans: self.inner.scans.load(Ordering::Relaxed),
            blocks_read: self.inner.blocks_read.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub cells_applied: u64,
    pub bytes_applied: u64,
    pub mutation_conflicts: u64,
    pub log_writes: u64,
    pub log_bytes: u64,
    pub log_syncs: u64,
    pub fragments_written: u64,
    pub compactions: u64,
    pub scans: u64,
    pub blocks_read: u64,
}
