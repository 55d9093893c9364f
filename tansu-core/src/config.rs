//! Configuration for Tansu components.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level tablet server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Root directory for tablet data
    pub root_dir: PathBuf,
    /// Advertised server location, recorded in meta entries
    pub location: String,
    /// Largest packed cell buffer accepted by apply()
    pub max_buffer_size: usize,
    /// Mem buffer size that triggers serialization to a fragment
    pub mem_flush_size: usize,
    pub fragment: FragmentConfig,
    pub log: LogConfig,
    pub compaction: CompactionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data"),
            location: "localhost".to_string(),
            max_buffer_size: 512 << 20,
            mem_flush_size: 64 << 20,
            fragment: FragmentConfig::default(),
            log: LogConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

/// Fragment file writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// Cell block flush threshold in bytes
    pub block_size: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
        }
    }
}

/// Commit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Rotate log files past this size
    pub max_file_size: u64,
    /// Largest number of commits folded into one fsync
    pub group_commit_batch: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_file_size: 256 << 20,
            group_commit_batch: 64,
        }
    }
}

/// Compaction selection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Chains longer than this are always candidates
    pub max_chain_length: usize,
    /// Merge when size(newer) * size_ratio >= size(older neighbor)
    pub size_ratio: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_chain_length: 6,
            size_ratio: 4,
        }
    }
}
