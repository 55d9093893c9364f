//! Fragments are immutable, sorted files of cells.
//! They are the primary on-disk format for Tansu tablets.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Fragment File Structure                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Cell Blocks                      │    │
//! │  │  ┌──────────────────────────────────────────────┐   │    │
//! │  │  │ Record Header: [type][version][length]       │   │    │
//! │  │  │ ┌─────────────────────────────────────────┐  │   │    │
//! │  │  │ │ cells offset / cells count              │  │   │    │
//! │  │  │ │ CellData: [row_off][col_off][ts][val_off]│ │   │    │
//! │  │  │ │ ...                                     │  │   │    │
//! │  │  │ │ string pool: [len][bytes]...            │  │   │    │
//! │  │  │ └─────────────────────────────────────────┘  │   │    │
//! │  │  └──────────────────────────────────────────────┘   │    │
//! │  │  Block 2...                                         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Block Index                      │    │
//! │  │  IndexEntry: [adler32][last_row][offset]            │    │
//! │  │              [ts_min][ts_max][family_mask]          │    │
//! │  │  column family pool                                 │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        TableInfo footer (final 24 bytes)            │    │
//! │  │  [header][index_offset][magic]                      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Records are 8-byte aligned. String
//! references are payload-relative offsets into a deduplicated pool; a
//! value offset of zero marks an erasure.

mod builder;
mod reader;
mod types;
mod writer;

pub use builder::{BlockBuilder, IndexBuilder, RecordBuilder, SegId, StringPoolBuilder};
pub use reader::{BlockReader, DiskFragment, FragmentBlock};
pub use types::{
    IndexEntry, RecordHeader, CELL_DATA_SIZE, FRAGMENT_MAGIC, INDEX_ENTRY_SIZE,
    RECORD_BLOCK_INDEX, RECORD_CELL_BLOCK, RECORD_HEADER_SIZE, RECORD_TABLE_INFO,
    TABLE_INFO_SIZE, VERSION_BLOCK_INDEX, VERSION_CELL_BLOCK, VERSION_TABLE_INFO,
};
pub use writer::{FragmentInfo, FragmentWriter};

use std::sync::Arc;

use tansu_core::cell::{Cell, CellStream};
use tansu_core::error::Result;
use tansu_core::predicate::ScanPredicate;

/// Read interface over an immutable fragment.
///
/// `next_block` finds the next block ordinal at or after `min_block` whose
/// row range, time range, and column families can intersect the predicate;
/// `load_block` materializes one block, verifying its checksum.
pub trait Fragment: Send + Sync {
    fn next_block(&self, pred: &ScanPredicate, min_block: usize) -> Option<usize>;

    fn load_block(&self, block: usize) -> Result<FragmentBlock>;

    /// On-disk size, used by compaction selection.
    fn data_size(&self) -> u64;
}

/// Streams the cells of one fragment matching a predicate, loading one
/// block at a time.
pub struct FragmentScanner {
    fragment: Arc<dyn Fragment>,
    pred: ScanPredicate,
    next_block: usize,
    buffered: std::vec::IntoIter<Cell>,
}

impl FragmentScanner {
    pub fn new(fragment: Arc<dyn Fragment>, pred: ScanPredicate) -> Self {
        Self {
            fragment,
            pred,
            next_block: 0,
            buffered: Vec::new().into_iter(),
        }
    }
}

impl CellStream for FragmentScanner {
    fn next_cell(&mut self) -> Result<Option<Cell>> {
        loop {
            if let Some(cell) = self.buffered.next() {
                return Ok(Some(cell));
            }
            let ordinal = match self.fragment.next_block(&self.pred, self.next_block) {
                Some(i) => i,
                None => return Ok(None),
            };
            let block = self.fragment.load_block(ordinal)?;
            let mut reader = block.make_reader(self.pred.clone());
            let mut cells = Vec::new();
            reader.copy_until(None, &mut cells)?;
            self.buffered = cells.into_iter();
            self.next_block = ordinal + 1;
        }
    }
}
