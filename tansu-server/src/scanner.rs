//! Scan assembly.
//!
//! A server scan routes to every tablet whose range can match the
//! predicate, merges each tablet's mem buffers and fragment chain, and
//! concatenates the per-tablet streams in row order.

use std::collections::VecDeque;
use std::sync::Arc;

use tansu_core::cell::{Cell, CellStream, CellStreamHandle};
use tansu_core::error::Result;
use tansu_core::predicate::ScanPredicate;
use tansu_storage::fragment::FragmentScanner;
use tansu_storage::{CellMerge, MemTable, MergeOptions};

use crate::gc::FragmentHandle;

/// Merge one tablet's sources under a clipped predicate. Sources order:
/// live mem, frozen mems newest-first, then the fragment chain.
pub fn tablet_stream(
    pred: &ScanPredicate,
    mems: Vec<Arc<MemTable>>,
    chain: &[Arc<FragmentHandle>],
) -> CellStreamHandle {
    let mut sources: Vec<CellStreamHandle> = Vec::with_capacity(mems.len() + chain.len());
    for mem in mems {
        sources.push(Box::new(mem.scan(pred.clone())));
    }
    for handle in chain {
        sources.push(Box::new(FragmentScanner::new(
            handle.fragment(),
            pred.clone(),
        )));
    }
    let opts = MergeOptions {
        keep_erasures: false,
        history: pred.history(),
    };
    Box::new(CellMerge::new(sources, opts))
}

/// Streams several row-disjoint streams one after another.
pub struct ConcatStream {
    streams: VecDeque<CellStreamHandle>,
}

impl ConcatStream {
    pub fn new(streams: Vec<CellStreamHandle>) -> Self {
        Self {
            streams: streams.into(),
        }
    }
}

impl CellStream for ConcatStream {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        while let Some(stream) = self.streams.front_mut() {
            if let Some(cell) = stream.next_cell()? {
                return Ok(Some(cell));
            }
            self.streams.pop_front();
        }
        Ok(None)
    }
}
