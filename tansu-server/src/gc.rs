//! Fragment lifetime tracking.
//!
//! Chains, scanners, and compaction jobs share fragments through
//! [`FragmentHandle`]s. When a compaction unlinks a fragment from every
//! chain, the GC marks it for removal; the file is deleted when the last
//! outstanding handle (typically a scanner's) drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use tansu_storage::fragment::Fragment;

pub struct FragmentHandle {
    uri: String,
    fragment: Arc<dyn Fragment>,
    size: u64,
    remove_on_drop: AtomicBool,
}

impl FragmentHandle {
    pub fn new(uri: String, fragment: Arc<dyn Fragment>, size: u64) -> Arc<Self> {
        Arc::new(Self {
            uri,
            fragment,
            size,
            remove_on_drop: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn fragment(&self) -> Arc<dyn Fragment> {
        Arc::clone(&self.fragment)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn mark_remove(&self) {
        self.remove_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for FragmentHandle {
    fn drop(&mut self) {
        if self.remove_on_drop.load(Ordering::Acquire) {
            match std::fs::remove_file(&self.uri) {
                Ok(()) => debug!(uri = %self.uri, "removed retired fragment"),
                Err(e) => warn!(uri = %self.uri, error = %e, "failed to remove retired fragment"),
            }
        }
    }
}

/// Retires fragments that no chain references anymore.
#[derive(Default)]
pub struct LocalFragmentGc;

impl LocalFragmentGc {
    pub fn new() -> Self {
        Self
    }

    /// Mark `handle` for deletion once every outstanding reference drops.
    /// The caller must have verified no chain still holds it.
    pub fn retire(&self, handle: &Arc<FragmentHandle>) {
        handle.mark_remove();
    }
}
