//! # Tansu Storage
//!
//! Storage formats for the Tansu tablet server:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  tansu-storage                  │
//! ├─────────────────────────────────────────────────┤
//! │  • fragment  - Immutable on-disk cell files     │
//! │  • memtable  - Ordered in-RAM write buffer      │
//! │  • merge     - K-way merge with erasure rules   │
//! │  • log       - Commit log writer and player     │
//! │  • config    - Tablet config persistence        │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod fragment;
pub mod log;
pub mod memtable;
pub mod merge;

pub use config::{ConfigReader, ConfigWriter, FixedConfigAdapter, MetaConfigAdapter, TabletConfig};
pub use fragment::{DiskFragment, Fragment, FragmentScanner, FragmentWriter};
pub use log::{LogCommit, LogPlayer, LogWriter, ReplayCommit};
pub use memtable::{MemScanner, MemTable, MemoryTable};
pub use merge::{CellMerge, MergeOptions};
