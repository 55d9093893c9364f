//! Fragment writer implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use adler32::RollingAdler32;
use byteorder::{ByteOrder, LittleEndian};
use tracing::info;

use tansu_core::cell::CellOutput;
use tansu_core::config::FragmentConfig;
use tansu_core::error::{Error, Result};

use super::builder::{BlockBuilder, FamilyMaskBuilder, IndexBuilder};
use super::types::{
    record_padding, RecordHeader, FRAGMENT_MAGIC, RECORD_BLOCK_INDEX, RECORD_CELL_BLOCK,
    RECORD_TABLE_INFO, VERSION_BLOCK_INDEX, VERSION_CELL_BLOCK, VERSION_TABLE_INFO,
};

/// Summary of a finished fragment.
#[derive(Debug, Clone)]
pub struct FragmentInfo {
    pub path: PathBuf,
    pub file_size: u64,
    pub cell_count: u64,
    pub block_count: u64,
}

/// Writes one immutable fragment file.
///
/// Cells MUST be emitted in canonical order (row asc, column asc,
/// timestamp desc); out-of-order emits fail. Erasures are cells with no
/// value. On error the caller owns cleanup of the partial file (or use
/// [`FragmentWriter::abort`]).
pub struct FragmentWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    block_size: usize,
    block: BlockBuilder,
    index: IndexBuilder,
    masks: FamilyMaskBuilder,
    file_offset: u64,
    cell_count: u64,
    block_count: u64,
    last_key: Option<(Vec<u8>, Vec<u8>, i64)>,
}

impl FragmentWriter {
    pub fn create(path: impl AsRef<Path>, config: &FragmentConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(format!("failed to create fragment {:?}", path), e))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            block_size: config.block_size,
            block: BlockBuilder::new(),
            index: IndexBuilder::new(),
            masks: FamilyMaskBuilder::new(),
            file_offset: 0,
            cell_count: 0,
            block_count: 0,
            last_key: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn emit_cell(&mut self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        self.emit(row, column, timestamp, Some(value))
    }

    pub fn emit_erasure(&mut self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        self.emit(row, column, timestamp, None)
    }

    fn emit(&mut self, row: &[u8], column: &[u8], timestamp: i64, value: Option<&[u8]>) -> Result<()> {
        self.check_order(row, column, timestamp)?;

        let bit = self.masks.bit_for_column(column);
        self.block.add(row, column, timestamp, value, bit);
        self.cell_count += 1;

        if self.block.data_size() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn check_order(&mut self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        if let Some((last_row, last_col, last_ts)) = &self.last_key {
            let ordered = match last_row.as_slice().cmp(row) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => match last_col.as_slice().cmp(column) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    // Same (row, column): timestamps strictly descending
                    std::cmp::Ordering::Equal => timestamp < *last_ts,
                },
            };
            if !ordered {
                return Err(Error::runtime(format!(
                    "cell emitted out of order: ({},{},@{})",
                    tansu_core::repr::repr_bytes(row),
                    tansu_core::repr::repr_bytes(column),
                    timestamp
                )));
            }
            let (r, c, t) = self.last_key.as_mut().unwrap();
            r.clear();
            r.extend_from_slice(row);
            c.clear();
            c.extend_from_slice(column);
            *t = timestamp;
        } else {
            self.last_key = Some((row.to_vec(), column.to_vec(), timestamp));
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        let block = std::mem::take(&mut self.block);
        let last_row = block.last_row().to_vec();
        let (ts_min, ts_max) = block.time_range();
        let mask = block.family_mask();
        let payload = block.finish();

        let mut adler = RollingAdler32::new();
        adler.update_buffer(&payload);
        self.index.add_entry(
            adler.hash(),
            &last_row,
            self.file_offset,
            ts_min,
            ts_max,
            mask,
        );

        self.write_record(RECORD_CELL_BLOCK, VERSION_CELL_BLOCK, &payload)?;
        self.block_count += 1;
        Ok(())
    }

    fn write_record(&mut self, record_type: u16, version: u16, payload: &[u8]) -> Result<()> {
        let header = RecordHeader::new(record_type, version, payload.len() as u32);
        self.writer.write_all(&header.encode())?;
        self.writer.write_all(payload)?;
        let pad = record_padding(payload.len());
        if pad > 0 {
            self.writer.write_all(&[0u8; 8][..pad])?;
        }
        self.file_offset += (8 + payload.len() + pad) as u64;
        Ok(())
    }

    /// Flush the pending block, write the index and footer, and make the
    /// file durable.
    pub fn finish(mut self) -> Result<FragmentInfo> {
        self.flush_block()?;

        let index_offset = self.file_offset;
        let index = std::mem::take(&mut self.index);
        let payload = index.finish(self.masks.families());
        self.write_record(RECORD_BLOCK_INDEX, VERSION_BLOCK_INDEX, &payload)?;

        // TableInfo footer: the final 24 bytes anchor the index
        let mut footer = [0u8; 16];
        LittleEndian::write_u64(&mut footer[0..8], index_offset);
        LittleEndian::write_u64(&mut footer[8..16], FRAGMENT_MAGIC);
        self.write_record(RECORD_TABLE_INFO, VERSION_TABLE_INFO, &footer)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        info!(
            path = ?self.path,
            cells = self.cell_count,
            blocks = self.block_count,
            bytes = self.file_offset,
            "finished fragment"
        );

        Ok(FragmentInfo {
            path: self.path.clone(),
            file_size: self.file_offset,
            cell_count: self.cell_count,
            block_count: self.block_count,
        })
    }

    /// Drop the writer and remove the partial file.
    pub fn abort(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)
            .map_err(|e| Error::io(format!("failed to remove aborted fragment {:?}", path), e))
    }

    pub fn cell_count(&self) -> u64 {
        self.cell_count
    }

    /// Approximate size: bytes written plus pending block and index.
    pub fn data_size(&self) -> u64 {
        self.file_offset + self.block.data_size() as u64 + self.index.data_size() as u64
    }
}

impl CellOutput for FragmentWriter {
    fn emit_cell(&mut self, row: &[u8], column: &[u8], timestamp: i64, value: &[u8]) -> Result<()> {
        FragmentWriter::emit_cell(self, row, column, timestamp, value)
    }

    fn emit_erasure(&mut self, row: &[u8], column: &[u8], timestamp: i64) -> Result<()> {
        FragmentWriter::emit_erasure(self, row, column, timestamp)
    }
}
