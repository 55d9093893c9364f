//! Packed cell buffers.
//!
//! A `CellBuffer` is the self-describing wire form of a batch of cells,
//! used as the payload of `apply()` and of commit log records. Buffers are
//! content-addressed by a SHA-256 digest so log replay can skip batches it
//! has already applied.
//!
//! Layout (little-endian):
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ magic  u32  "TNSB"                            │
//! │ count  u32                                    │
//! │ cell 0:                                       │
//! │   row_len u32 │ col_len u32 │ value_len u32   │
//! │   timestamp i64                               │
//! │   row bytes │ col bytes │ value bytes         │
//! │ cell 1...                                     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! `value_len == u32::MAX` marks an erasure (no value bytes follow).

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::cell::Cell;
use crate::error::{Error, Result};

const BUFFER_MAGIC: u32 = 0x42534e54; // "TNSB"
const ERASURE_LEN: u32 = u32::MAX;
const HEADER_SIZE: usize = 8;
const CELL_FIXED_SIZE: usize = 20;

/// An immutable, validated batch of packed cells.
#[derive(Debug, Clone)]
pub struct CellBuffer {
    data: Bytes,
    cells: Vec<Cell>,
    digest: [u8; 32],
}

impl CellBuffer {
    /// Pack a batch of cells.
    pub fn pack(cells: &[Cell]) -> CellBuffer {
        let mut size = HEADER_SIZE;
        for cell in cells {
            size += CELL_FIXED_SIZE + cell.row().len() + cell.column().len() + cell.value().len();
        }

        let mut buf = vec![0u8; size];
        LittleEndian::write_u32(&mut buf[0..4], BUFFER_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], cells.len() as u32);

        let mut pos = HEADER_SIZE;
        for cell in cells {
            let value_len = match &cell.value {
                Some(v) => v.len() as u32,
                None => ERASURE_LEN,
            };
            LittleEndian::write_u32(&mut buf[pos..], cell.row().len() as u32);
            LittleEndian::write_u32(&mut buf[pos + 4..], cell.column().len() as u32);
            LittleEndian::write_u32(&mut buf[pos + 8..], value_len);
            LittleEndian::write_i64(&mut buf[pos + 12..], cell.timestamp());
            pos += CELL_FIXED_SIZE;

            buf[pos..pos + cell.row().len()].copy_from_slice(cell.row());
            pos += cell.row().len();
            buf[pos..pos + cell.column().len()].copy_from_slice(cell.column());
            pos += cell.column().len();
            if let Some(v) = &cell.value {
                buf[pos..pos + v.len()].copy_from_slice(v);
                pos += v.len();
            }
        }
        debug_assert_eq!(pos, size);

        let data = Bytes::from(buf);
        let digest = Sha256::digest(&data).into();
        CellBuffer {
            cells: cells.to_vec(),
            data,
            digest,
        }
    }

    /// Decode and validate a packed buffer. Decoded cells alias the input
    /// buffer; no byte copies are made.
    pub fn decode(data: impl Into<Bytes>) -> Result<CellBuffer> {
        let data: Bytes = data.into();
        if data.len() < HEADER_SIZE {
            return Err(Error::value("cell buffer too short"));
        }
        if LittleEndian::read_u32(&data[0..4]) != BUFFER_MAGIC {
            return Err(Error::value("bad cell buffer magic"));
        }
        let count = LittleEndian::read_u32(&data[4..8]) as usize;

        let mut cells = Vec::with_capacity(count);
        let mut pos = HEADER_SIZE;
        for _ in 0..count {
            if data.len() < pos + CELL_FIXED_SIZE {
                return Err(Error::value("truncated cell buffer"));
            }
            let row_len = LittleEndian::read_u32(&data[pos..]) as usize;
            let col_len = LittleEndian::read_u32(&data[pos + 4..]) as usize;
            let value_len = LittleEndian::read_u32(&data[pos + 8..]);
            let timestamp = LittleEndian::read_i64(&data[pos + 12..]);
            pos += CELL_FIXED_SIZE;

            let is_erasure = value_len == ERASURE_LEN;
            let payload = row_len + col_len + if is_erasure { 0 } else { value_len as usize };
            if data.len() < pos + payload {
                return Err(Error::value("truncated cell buffer"));
            }

            let row = data.slice(pos..pos + row_len);
            pos += row_len;
            let column = data.slice(pos..pos + col_len);
            pos += col_len;
            let value = if is_erasure {
                None
            } else {
                let v = data.slice(pos..pos + value_len as usize);
                pos += value_len as usize;
                Some(v)
            };

            cells.push(Cell {
                key: crate::cell::CellKey {
                    row,
                    column,
                    timestamp,
                },
                value,
            });
        }
        if pos != data.len() {
            return Err(Error::value("trailing bytes in cell buffer"));
        }

        let digest = Sha256::digest(&data).into();
        Ok(CellBuffer {
            data,
            cells,
            digest,
        })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Packed wire bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// SHA-256 over the packed bytes; the buffer's content address.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The distinct rows touched by this buffer, in sorted order.
    pub fn rows(&self) -> Vec<&[u8]> {
        let set: BTreeSet<&[u8]> = self.cells.iter().map(|c| c.row()).collect();
        set.into_iter().collect()
    }
}
