//! Commit log.
//!
//! An append-only log of durable commits, one record per apply batch.
//! The tablet server's log thread owns a [`LogWriter`]; on restart a
//! [`LogPlayer`] replays records for a (table, row range) into the
//! reloading tablet's mem buffer.
//!
//! File layout:
//! - Header (16 bytes): magic "TANSULOG", version u32, reserved u32
//! - Records: table_len u32, cells_len u32, txn i64, crc32(cells) u32,
//!   table bytes, packed cell buffer bytes
//!
//! A torn record at the tail (crash mid-write) ends replay of that file;
//! records before it are intact. Cell buffers are content-addressed, so
//! replay deduplicates batches that appear in more than one file.
//
// TODO: delete log files whose txn range is fully covered by serialized
// fragments; today the log only grows until the server is recreated.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use tracing::{info, warn};

use tansu_core::buffer::CellBuffer;
use tansu_core::cell::Cell;
use tansu_core::config::LogConfig;
use tansu_core::error::{Error, Result};
use tansu_core::interval::Interval;

const LOG_MAGIC: &[u8; 8] = b"TANSULOG";
const LOG_VERSION: u32 = 1;
const LOG_HEADER_SIZE: u64 = 16;

/// One commit to be made durable.
#[derive(Debug, Clone)]
pub struct LogCommit {
    pub table: String,
    pub txn: i64,
    pub cells: Bytes,
}

pub struct LogWriter {
    dir: PathBuf,
    config: LogConfig,
    file: BufWriter<File>,
    path: PathBuf,
    size: u64,
    file_seq: u64,
}

impl LogWriter {
    /// Open a log directory for appending; a fresh file is started after
    /// any existing ones.
    pub fn open(dir: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create log dir {:?}", dir), e))?;

        let file_seq = list_log_files(&dir)?
            .last()
            .map(|(seq, _)| seq + 1)
            .unwrap_or(0);
        let (file, path) = create_log_file(&dir, file_seq)?;

        Ok(Self {
            dir,
            config,
            file,
            path,
            size: LOG_HEADER_SIZE,
            file_seq,
        })
    }

    pub fn append(&mut self, commit: &LogCommit) -> Result<()> {
        let record_size =
            20 + commit.table.len() as u64 + commit.cells.len() as u64;
        if self.size + record_size > self.config.max_file_size {
            self.rotate()?;
        }

        self.file
            .write_u32::<LittleEndian>(commit.table.len() as u32)?;
        self.file
            .write_u32::<LittleEndian>(commit.cells.len() as u32)?;
        self.file.write_i64::<LittleEndian>(commit.txn)?;
        self.file
            .write_u32::<LittleEndian>(crc32fast::hash(&commit.cells))?;
        self.file.write_all(commit.table.as_bytes())?;
        self.file.write_all(&commit.cells)?;
        self.size += record_size;
        Ok(())
    }

    /// Flush and fsync everything appended so far.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.sync()?;
        self.file_seq += 1;
        let (file, path) = create_log_file(&self.dir, self.file_seq)?;
        self.file = file;
        self.path = path;
        self.size = LOG_HEADER_SIZE;
        info!(path = ?self.path, "rotated commit log");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_log_file(dir: &Path, seq: u64) -> Result<(BufWriter<File>, PathBuf)> {
    let path = dir.join(format!("{:08}.log", seq));
    let file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .map_err(|e| Error::io(format!("failed to create log file {:?}", path), e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(LOG_MAGIC)?;
    writer.write_u32::<LittleEndian>(LOG_VERSION)?;
    writer.write_u32::<LittleEndian>(0)?; // reserved
    writer.flush()?;
    Ok((writer, path))
}

fn list_log_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(Error::io(format!("failed to list log dir {:?}", dir), e)),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension() != Some(std::ffi::OsStr::new("log")) {
            continue;
        }
        if let Some(stem) = path.file_stem() {
            if let Ok(seq) = stem.to_string_lossy().parse::<u64>() {
                files.push((seq, path));
            }
        }
    }
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// A commit recovered from the log, already filtered to a row range.
#[derive(Debug)]
pub struct ReplayCommit {
    pub txn: i64,
    pub cells: Vec<Cell>,
}

pub struct LogPlayer {
    dir: PathBuf,
}

impl LogPlayer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Replay commits for `table` whose cells fall in `rows`, in log
    /// order, deduplicating batches by content address. Returns the
    /// highest txn seen for the table (across all rows), or -1 if none.
    pub fn replay(
        &self,
        table: &str,
        rows: &Interval<Vec<u8>>,
        sink: &mut dyn FnMut(ReplayCommit) -> Result<()>,
    ) -> Result<i64> {
        let mut max_txn = -1i64;
        let mut seen: HashSet<[u8; 32]> = HashSet::new();

        for (_, path) in list_log_files(&self.dir)? {
            self.replay_file(&path, table, rows, &mut seen, &mut max_txn, sink)?;
        }
        Ok(max_txn)
    }

    fn replay_file(
        &self,
        path: &Path,
        table: &str,
        rows: &Interval<Vec<u8>>,
        seen: &mut HashSet<[u8; 32]>,
        max_txn: &mut i64,
        sink: &mut dyn FnMut(ReplayCommit) -> Result<()>,
    ) -> Result<()> {
        let file =
            File::open(path).map_err(|e| Error::io(format!("failed to open log {:?}", path), e))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(Error::corruption(format!("bad log magic in {:?}", path)));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != LOG_VERSION {
            return Err(Error::corruption(format!(
                "unsupported log version {} in {:?}",
                version, path
            )));
        }
        let _reserved = reader.read_u32::<LittleEndian>()?;

        let mut replayed = 0u64;
        loop {
            let record = match read_record(&mut reader) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    // A torn tail record is expected after a crash
                    warn!(path = ?path, error = %err, "stopping replay at damaged record");
                    break;
                }
            };

            if record.table != table {
                continue;
            }
            *max_txn = (*max_txn).max(record.txn);
            let buffer = CellBuffer::decode(record.cells)?;
            if !seen.insert(*buffer.digest()) {
                continue;
            }
            let cells: Vec<Cell> = buffer
                .cells()
                .iter()
                .filter(|c| rows.contains(&c.row().to_vec()))
                .cloned()
                .collect();
            if cells.is_empty() {
                continue;
            }
            replayed += 1;
            sink(ReplayCommit {
                txn: record.txn,
                cells,
            })?;
        }

        if replayed > 0 {
            info!(path = ?path, commits = replayed, table, "replayed commit log");
        }
        Ok(())
    }
}

struct RawRecord {
    table: String,
    txn: i64,
    cells: Bytes,
}

fn read_record(reader: &mut impl Read) -> Result<Option<RawRecord>> {
    let table_len = match reader.read_u32::<LittleEndian>() {
        Ok(v) => v as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let cells_len = reader.read_u32::<LittleEndian>()? as usize;
    let txn = reader.read_i64::<LittleEndian>()?;
    let crc = reader.read_u32::<LittleEndian>()?;

    let mut table = vec![0u8; table_len];
    reader.read_exact(&mut table)?;
    let mut cells = vec![0u8; cells_len];
    reader.read_exact(&mut cells)?;

    if crc32fast::hash(&cells) != crc {
        return Err(Error::corruption("crc mismatch in log record"));
    }
    let table = String::from_utf8(table)
        .map_err(|_| Error::corruption("log record table name is not UTF-8"))?;

    Ok(Some(RawRecord {
        table,
        txn,
        cells: Bytes::from(cells),
    }))
}
