//! # Tansu Core
//!
//! Fundamental building blocks shared by every Tansu crate:
//! - The cell data model and canonical ordering
//! - Intervals and scan predicates
//! - Packed cell buffers and tablet name encoding
//! - Error types, metrics, and configuration
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   tansu-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • cell        - Cells, keys, streams, sinks    │
//! │  • interval    - Bounds and interval sets       │
//! │  • predicate   - Scan predicate language        │
//! │  • buffer      - Packed apply/log payloads      │
//! │  • tablet_name - Sortable meta row keys         │
//! │  • table       - Client table interface         │
//! │  • error       - Error handling                 │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod cell;
pub mod config;
pub mod error;
pub mod interval;
pub mod metrics;
pub mod predicate;
pub mod repr;
pub mod table;
pub mod tablet_name;

pub use buffer::CellBuffer;
pub use cell::{Cell, CellKey, CellOutput, CellStream, CellStreamHandle};
pub use error::{Error, Result};
pub use interval::{Interval, IntervalSet, LowerBound, UpperBound};
pub use predicate::ScanPredicate;
pub use table::Table;
pub use tablet_name::TabletName;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit transaction sentinel: apply unconditionally.
pub const MAX_TXN: i64 = i64::MAX;
