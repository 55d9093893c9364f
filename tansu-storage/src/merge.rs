//! K-way cell merge.
//!
//! Merges ordered cell streams (mem buffers and fragments, newest source
//! first) into one canonical-order stream, resolving key conflicts toward
//! the newest source and applying erasure and history semantics:
//!
//! - Exact key duplicates: only the newest source's cell survives.
//! - An erasure at (r, c, t) suppresses non-erasure cells at (r, c, t' <= t).
//! - With `history = N`, at most N non-erasure cells survive per (r, c).
//! - Erasures themselves pass through only when `keep_erasures` is set
//!   (compactions that are not full chain-suffix merges must retain them).

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use bytes::Bytes;

use tansu_core::cell::{Cell, CellStream, CellStreamHandle};
use tansu_core::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Emit erasure cells instead of consuming them
    pub keep_erasures: bool,
    /// Keep at most N newest non-erasure cells per (row, column)
    pub history: Option<u32>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            keep_erasures: false,
            history: None,
        }
    }
}

struct MergeEntry {
    cell: Cell,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cell.key == other.cell.key && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Canonical key order; ties go to the newer (lower) source
        self.cell
            .key
            .cmp(&other.cell.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merged view over ordered sources, newest first.
pub struct CellMerge {
    sources: Vec<CellStreamHandle>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    opts: MergeOptions,
    primed: bool,
    last_key: Option<tansu_core::cell::CellKey>,
    group: Option<(Bytes, Bytes)>,
    group_erased: bool,
    group_emitted: u32,
}

impl CellMerge {
    /// `sources` must each yield cells in canonical order; index 0 is the
    /// newest.
    pub fn new(sources: Vec<CellStreamHandle>, opts: MergeOptions) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            opts,
            primed: false,
            last_key: None,
            group: None,
            group_erased: false,
            group_emitted: 0,
        }
    }

    fn prime(&mut self) -> Result<()> {
        for source in 0..self.sources.len() {
            self.pull(source)?;
        }
        self.primed = true;
        Ok(())
    }

    fn pull(&mut self, source: usize) -> Result<()> {
        if let Some(cell) = self.sources[source].next_cell()? {
            self.heap.push(Reverse(MergeEntry { cell, source }));
        }
        Ok(())
    }
}

impl CellStream for CellMerge {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        if !self.primed {
            self.prime()?;
        }

        while let Some(Reverse(entry)) = self.heap.pop() {
            self.pull(entry.source)?;
            let cell = entry.cell;

            // Exact key duplicate: an older source's cell for a key the
            // newest source already decided
            if self.last_key.as_ref() == Some(&cell.key) {
                continue;
            }
            self.last_key = Some(cell.key.clone());

            let group = (cell.key.row.clone(), cell.key.column.clone());
            if self.group.as_ref() != Some(&group) {
                self.group = Some(group);
                self.group_erased = false;
                self.group_emitted = 0;
            }

            if cell.is_erasure() {
                // Everything after this in the group is older, hence
                // shadowed
                self.group_erased = true;
                if self.opts.keep_erasures {
                    return Ok(Some(cell));
                }
                continue;
            }

            if self.group_erased {
                continue;
            }
            if let Some(limit) = self.opts.history {
                if self.group_emitted >= limit {
                    continue;
                }
            }
            self.group_emitted += 1;
            return Ok(Some(cell));
        }
        Ok(None)
    }
}
