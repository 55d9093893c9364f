//! Fragment reader implementation.
//!
//! Opening a fragment memory-maps the file, reads the TableInfo footer,
//! and loads the block index once. Blocks are materialized on demand and
//! checksum-verified against their index entries.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use adler32::RollingAdler32;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use memmap2::Mmap;
use tracing::debug;

use tansu_core::cell::{Cell, CellKey, CellOutput};
use tansu_core::error::{Error, Result};
use tansu_core::interval::{Interval, LowerBound, UpperBound};
use tansu_core::predicate::ScanPredicate;

use super::types::{
    read_pooled_string, IndexEntry, RecordHeader, CELL_DATA_SIZE, FRAGMENT_MAGIC,
    INDEX_ENTRY_SIZE, RECORD_BLOCK_INDEX, RECORD_CELL_BLOCK, RECORD_HEADER_SIZE,
    RECORD_TABLE_INFO, TABLE_INFO_SIZE, VERSION_BLOCK_INDEX, VERSION_CELL_BLOCK,
    VERSION_TABLE_INFO,
};
use super::Fragment;

/// Read handle over one fragment file.
pub struct DiskFragment {
    path: PathBuf,
    mmap: Mmap,
    file_size: u64,
    index: Vec<IndexEntry>,
    /// Family pool in bit-assignment order
    families: Vec<Bytes>,
    /// Whether any block carries a non-zero family mask
    masks_present: bool,
}

impl DiskFragment {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| Error::io(format!("failed to open fragment {:?}", path), e))?;
        let file_size = file.metadata()?.len();

        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| Error::io(format!("failed to mmap {:?}", path), e))?
        };

        // Footer: the final 24 bytes anchor the index
        if file_size < TABLE_INFO_SIZE as u64 {
            return Err(Error::corruption(format!(
                "fragment {:?} too small for footer",
                path
            )));
        }
        let footer = &mmap[(file_size as usize - TABLE_INFO_SIZE)..];
        RecordHeader::expect(footer, RECORD_TABLE_INFO, VERSION_TABLE_INFO)?;
        let index_offset = LittleEndian::read_u64(&footer[8..16]);
        let magic = LittleEndian::read_u64(&footer[16..24]);
        if magic != FRAGMENT_MAGIC {
            return Err(Error::corruption(format!(
                "fragment {:?} has bad footer magic",
                path
            )));
        }
        if index_offset + RECORD_HEADER_SIZE as u64 > file_size {
            return Err(Error::corruption(format!(
                "fragment {:?} index offset out of bounds",
                path
            )));
        }

        // Load the block index once
        let header = RecordHeader::expect(
            &mmap[index_offset as usize..],
            RECORD_BLOCK_INDEX,
            VERSION_BLOCK_INDEX,
        )?;
        let payload_start = index_offset as usize + RECORD_HEADER_SIZE;
        let payload_end = payload_start + header.length as usize;
        if payload_end > file_size as usize {
            return Err(Error::corruption(format!(
                "fragment {:?} index record out of bounds",
                path
            )));
        }
        let payload = Bytes::copy_from_slice(&mmap[payload_start..payload_end]);
        let (index, families) = parse_index(&payload)?;
        let masks_present = index.iter().any(|e| e.family_mask != 0);

        debug!(path = ?path, blocks = index.len(), "opened fragment");

        Ok(Self {
            path,
            mmap,
            file_size,
            index,
            families,
            masks_present,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn families(&self) -> &[Bytes] {
        &self.families
    }

    /// The predicate's family mask under this fragment's bit assignment,
    /// or `None` when the mask filter cannot be applied.
    fn pred_mask(&self, pred: &ScanPredicate) -> Option<u32> {
        if !self.masks_present {
            return None;
        }
        let fams = pred.column_families()?;
        let mut mask = 0u32;
        for fam in fams {
            for (i, known) in self.families.iter().enumerate() {
                if known.as_ref() == fam.as_slice() {
                    mask |= 1u32 << (i % 32);
                }
            }
        }
        Some(mask)
    }

    /// Row interval covered by block `i`: bounded below by the previous
    /// block's last row, and above by its own. Blocks flush without row
    /// alignment, so a row may end one block and continue into the next;
    /// the shared boundary row belongs to both ranges.
    fn block_rows(&self, i: usize) -> Interval<Vec<u8>> {
        let lower = if i == 0 {
            LowerBound::Unbounded
        } else {
            LowerBound::Inclusive(self.index[i - 1].last_row.to_vec())
        };
        Interval::new(lower, UpperBound::Inclusive(self.index[i].last_row.to_vec()))
    }

    pub fn open_shared(path: impl AsRef<Path>) -> Result<Arc<dyn Fragment>> {
        Ok(Arc::new(Self::open(path)?))
    }
}

impl Fragment for DiskFragment {
    fn next_block(&self, pred: &ScanPredicate, min_block: usize) -> Option<usize> {
        let pred_mask = self.pred_mask(pred);
        for i in min_block..self.index.len() {
            let entry = &self.index[i];
            if !pred.rows_overlap(&self.block_rows(i)) {
                continue;
            }
            if !pred.times_overlap(entry.ts_min, entry.ts_max) {
                continue;
            }
            if let Some(mask) = pred_mask {
                if mask & entry.family_mask == 0 {
                    continue;
                }
            }
            return Some(i);
        }
        None
    }

    fn load_block(&self, block: usize) -> Result<FragmentBlock> {
        let entry = self
            .index
            .get(block)
            .ok_or_else(|| Error::runtime(format!("block {} out of range", block)))?;

        let start = entry.block_offset as usize;
        if start + RECORD_HEADER_SIZE > self.mmap.len() {
            return Err(Error::corruption("block offset out of bounds"));
        }
        let header = RecordHeader::expect(&self.mmap[start..], RECORD_CELL_BLOCK, VERSION_CELL_BLOCK)?;
        let payload_start = start + RECORD_HEADER_SIZE;
        let payload_end = payload_start + header.length as usize;
        if payload_end > self.mmap.len() {
            return Err(Error::corruption("block record out of bounds"));
        }
        let payload = Bytes::copy_from_slice(&self.mmap[payload_start..payload_end]);

        let mut adler = RollingAdler32::new();
        adler.update_buffer(&payload);
        if adler.hash() != entry.checksum {
            return Err(Error::corruption(format!(
                "adler32 mismatch in block {} of {:?}",
                block, self.path
            )));
        }

        FragmentBlock::from_payload(payload)
    }

    fn data_size(&self) -> u64 {
        self.file_size
    }
}

fn parse_index(payload: &Bytes) -> Result<(Vec<IndexEntry>, Vec<Bytes>)> {
    if payload.len() < 16 {
        return Err(Error::corruption("index payload too short"));
    }
    let entries_off = LittleEndian::read_u32(&payload[0..4]) as usize;
    let entries_len = LittleEndian::read_u32(&payload[4..8]) as usize;
    let families_off = LittleEndian::read_u32(&payload[8..12]) as usize;
    let families_len = LittleEndian::read_u32(&payload[12..16]) as usize;

    if entries_off + entries_len * INDEX_ENTRY_SIZE > payload.len() {
        return Err(Error::corruption("index entries out of bounds"));
    }
    let mut entries = Vec::with_capacity(entries_len);
    for i in 0..entries_len {
        let at = entries_off + i * INDEX_ENTRY_SIZE;
        let entry = &payload[at..at + INDEX_ENTRY_SIZE];
        let last_row_off = LittleEndian::read_u32(&entry[4..8]);
        entries.push(IndexEntry {
            checksum: LittleEndian::read_u32(&entry[0..4]),
            last_row: read_pooled_string(payload, last_row_off)?,
            block_offset: LittleEndian::read_u64(&entry[8..16]),
            ts_min: LittleEndian::read_i64(&entry[16..24]),
            ts_max: LittleEndian::read_i64(&entry[24..32]),
            family_mask: LittleEndian::read_u32(&entry[32..36]),
        });
    }

    if families_off + families_len * 4 > payload.len() {
        return Err(Error::corruption("index family pool out of bounds"));
    }
    let mut families = Vec::with_capacity(families_len);
    for i in 0..families_len {
        let at = families_off + i * 4;
        let off = LittleEndian::read_u32(&payload[at..at + 4]);
        families.push(read_pooled_string(payload, off)?);
    }

    Ok((entries, families))
}

/// One loaded, checksum-verified cell block.
pub struct FragmentBlock {
    payload: Bytes,
    cells_off: usize,
    cell_count: usize,
}

impl FragmentBlock {
    pub fn from_payload(payload: Bytes) -> Result<Self> {
        if payload.len() < 8 {
            return Err(Error::corruption("cell block payload too short"));
        }
        let cells_off = LittleEndian::read_u32(&payload[0..4]) as usize;
        let cell_count = LittleEndian::read_u32(&payload[4..8]) as usize;
        if cells_off + cell_count * CELL_DATA_SIZE > payload.len() {
            return Err(Error::corruption("cell array out of bounds"));
        }
        Ok(Self {
            payload,
            cells_off,
            cell_count,
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Decode cell `i`. Row, column, and value bytes alias the block
    /// buffer.
    pub fn cell(&self, i: usize) -> Result<Cell> {
        debug_assert!(i < self.cell_count);
        let at = self.cells_off + i * CELL_DATA_SIZE;
        let data = &self.payload[at..at + CELL_DATA_SIZE];
        let row_off = LittleEndian::read_u32(&data[0..4]);
        let col_off = LittleEndian::read_u32(&data[4..8]);
        let timestamp = LittleEndian::read_i64(&data[8..16]);
        let value_off = LittleEndian::read_u32(&data[16..20]);

        let row = read_pooled_string(&self.payload, row_off)?;
        let column = read_pooled_string(&self.payload, col_off)?;
        // Offset zero encodes an erasure
        let value = if value_off == 0 {
            None
        } else {
            Some(read_pooled_string(&self.payload, value_off)?)
        };

        Ok(Cell {
            key: CellKey {
                row,
                column,
                timestamp,
            },
            value,
        })
    }

    pub fn make_reader(&self, pred: ScanPredicate) -> BlockReader {
        BlockReader {
            block: FragmentBlock {
                payload: self.payload.clone(),
                cells_off: self.cells_off,
                cell_count: self.cell_count,
            },
            pred,
            pos: 0,
        }
    }
}

/// Streams the cells of one block that match a predicate.
///
/// `advance` peeks the next matching key without consuming it;
/// `copy_until` emits matching cells into a sink until the next key
/// reaches `stop` or the block ends. Together they let a merger pull
/// without materializing the whole block.
pub struct BlockReader {
    block: FragmentBlock,
    pred: ScanPredicate,
    pos: usize,
}

impl BlockReader {
    /// Peek the key of the next matching cell.
    pub fn advance(&mut self) -> Result<Option<CellKey>> {
        while self.pos < self.block.cell_count {
            let cell = self.block.cell(self.pos)?;
            if self.pred.matches_key(&cell.key) {
                return Ok(Some(cell.key));
            }
            self.pos += 1;
        }
        Ok(None)
    }

    /// Emit matching cells in order until the next matching key is `>=
    /// stop` (or the block is exhausted when `stop` is `None`).
    pub fn copy_until(&mut self, stop: Option<&CellKey>, out: &mut dyn CellOutput) -> Result<()> {
        while self.pos < self.block.cell_count {
            let cell = self.block.cell(self.pos)?;
            if self.pred.matches_key(&cell.key) {
                if let Some(stop_key) = stop {
                    if cell.key >= *stop_key {
                        return Ok(());
                    }
                }
                out.emit(&cell)?;
            }
            self.pos += 1;
        }
        Ok(())
    }
}
