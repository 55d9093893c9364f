//! On-disk record types shared by the fragment writer and reader.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use tansu_core::error::{Error, Result};

/// "TANSUFRG"
pub const FRAGMENT_MAGIC: u64 = 0x47524655534e4154;

pub const RECORD_CELL_BLOCK: u16 = 0x0001;
pub const RECORD_BLOCK_INDEX: u16 = 0x0002;
pub const RECORD_TABLE_INFO: u16 = 0x0003;

pub const VERSION_CELL_BLOCK: u16 = 0;
pub const VERSION_BLOCK_INDEX: u16 = 1;
pub const VERSION_TABLE_INFO: u16 = 0;

pub const RECORD_HEADER_SIZE: usize = 8;
/// CellData: row_off u32, col_off u32, ts i64, value_off u32, pad u32
pub const CELL_DATA_SIZE: usize = 24;
/// IndexEntry: adler32 u32, last_row_off u32, block_offset u64,
/// ts_min i64, ts_max i64, family_mask u32, pad u32
pub const INDEX_ENTRY_SIZE: usize = 40;
/// TableInfo record: header + index_offset u64 + magic u64
pub const TABLE_INFO_SIZE: usize = RECORD_HEADER_SIZE + 16;

/// Typed record header: {type_code, version, payload length}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u16,
    pub version: u16,
    pub length: u32,
}

impl RecordHeader {
    pub fn new(record_type: u16, version: u16, length: u32) -> Self {
        Self {
            record_type,
            version,
            length,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        LittleEndian::write_u16(&mut buf[0..2], self.record_type);
        LittleEndian::write_u16(&mut buf[2..4], self.version);
        LittleEndian::write_u32(&mut buf[4..8], self.length);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<RecordHeader> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Err(Error::corruption("truncated record header"));
        }
        Ok(RecordHeader {
            record_type: LittleEndian::read_u16(&buf[0..2]),
            version: LittleEndian::read_u16(&buf[2..4]),
            length: LittleEndian::read_u32(&buf[4..8]),
        })
    }

    /// Decode and verify type and version.
    pub fn expect(buf: &[u8], record_type: u16, version: u16) -> Result<RecordHeader> {
        let header = Self::decode(buf)?;
        if header.record_type != record_type {
            return Err(Error::corruption(format!(
                "unexpected record type {:#06x}, wanted {:#06x}",
                header.record_type, record_type
            )));
        }
        if header.version != version {
            return Err(Error::corruption(format!(
                "unsupported record version {} for type {:#06x}",
                header.version, record_type
            )));
        }
        Ok(header)
    }
}

/// One block's entry in the loaded index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub checksum: u32,
    pub last_row: Bytes,
    pub block_offset: u64,
    pub ts_min: i64,
    pub ts_max: i64,
    pub family_mask: u32,
}

/// Read a pooled string `{len: u32, bytes}` at a payload-relative offset.
pub fn read_pooled_string(payload: &Bytes, offset: u32) -> Result<Bytes> {
    let off = offset as usize;
    if off + 4 > payload.len() {
        return Err(Error::corruption("string offset out of bounds"));
    }
    let len = LittleEndian::read_u32(&payload[off..off + 4]) as usize;
    if off + 4 + len > payload.len() {
        return Err(Error::corruption("string length out of bounds"));
    }
    Ok(payload.slice(off + 4..off + 4 + len))
}

/// Bytes of zero padding needed to align `len` up to 8.
pub fn record_padding(len: usize) -> usize {
    (8 - len % 8) % 8
}
