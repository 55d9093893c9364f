//! Tablets and their state machine.
//!
//! A tablet owns a contiguous row range of one table: a live mem buffer,
//! zero or more frozen mem buffers awaiting serialization, and a chain of
//! immutable fragments, newest first.

use std::fmt;
use std::sync::Arc;

use tansu_core::error::{Error, Result};
use tansu_core::interval::Interval;
use tansu_core::tablet_name::TabletName;
use tansu_storage::{MemTable, TabletConfig};

use crate::gc::FragmentHandle;

/// Lifecycle of a loaded tablet. An unloaded tablet has no entry at all.
///
/// ```text
/// UNLOADED → LOADING → LOG_REPLAYING → ACTIVE → UNLOADING → UNLOADED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabletState {
    Loading,
    LogReplaying,
    Active,
    Unloading,
}

impl fmt::Display for TabletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TabletState::Loading => "LOADING",
            TabletState::LogReplaying => "LOG_REPLAYING",
            TabletState::Active => "ACTIVE",
            TabletState::Unloading => "UNLOADING",
        };
        f.write_str(name)
    }
}

pub struct Tablet {
    pub name: TabletName,
    pub rows: Interval<Vec<u8>>,
    pub state: TabletState,
    pub mem: Arc<MemTable>,
    /// Frozen mem buffers awaiting serialization, oldest first
    pub frozen: Vec<Arc<MemTable>>,
    /// Fragment chain, newest first
    pub chain: Vec<Arc<FragmentHandle>>,
    /// Highest commit txn applied to this tablet
    pub last_commit: i64,
    /// A frozen buffer of this tablet is being serialized
    pub serializing: bool,
}

impl Tablet {
    pub fn new(name: TabletName, rows: Interval<Vec<u8>>, chain: Vec<Arc<FragmentHandle>>) -> Self {
        Self {
            name,
            rows,
            state: TabletState::Loading,
            mem: Arc::new(MemTable::new()),
            frozen: Vec::new(),
            chain,
            last_commit: 0,
            serializing: false,
        }
    }

    pub fn transition(&mut self, to: TabletState) -> Result<()> {
        use TabletState::*;
        let ok = matches!(
            (self.state, to),
            (Loading, LogReplaying) | (LogReplaying, Active) | (Active, Unloading)
        );
        if !ok {
            return Err(Error::runtime(format!(
                "invalid tablet state transition {} -> {} for {}",
                self.state, to, self.name
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Only an ACTIVE tablet accepts client applies.
    pub fn accepts_applies(&self) -> bool {
        self.state == TabletState::Active
    }

    /// Replay-origin inserts are additionally allowed while logs replay.
    pub fn accepts_replay(&self) -> bool {
        matches!(self.state, TabletState::LogReplaying | TabletState::Active)
    }

    /// Scans are served while ACTIVE and, for internal callers, during
    /// replay.
    pub fn accepts_scans(&self) -> bool {
        matches!(self.state, TabletState::Active | TabletState::LogReplaying)
    }

    /// Freeze the live mem buffer for serialization, replacing it with an
    /// empty one. The frozen buffer stays visible to scans.
    pub fn freeze_mem(&mut self) -> Arc<MemTable> {
        let frozen = std::mem::take(&mut self.mem);
        self.frozen.push(Arc::clone(&frozen));
        frozen
    }

    pub fn fragment_uris(&self) -> Vec<String> {
        self.chain.iter().map(|h| h.uri().to_string()).collect()
    }

    pub fn config(&self) -> TabletConfig {
        TabletConfig::new(self.rows.clone(), self.fragment_uris())
    }

    /// Mem buffers newest-first for a merged scan: live, then frozen from
    /// newest to oldest.
    pub fn mem_sources(&self) -> Vec<Arc<MemTable>> {
        let mut sources = Vec::with_capacity(1 + self.frozen.len());
        sources.push(Arc::clone(&self.mem));
        sources.extend(self.frozen.iter().rev().cloned());
        sources
    }
}
