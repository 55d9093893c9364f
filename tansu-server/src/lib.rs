//! # Tansu Server
//!
//! The tablet server and its collaborators:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  tansu-server                   │
//! ├─────────────────────────────────────────────────┤
//! │  • server    - Apply/sync/load/unload paths     │
//! │  • tablet    - Tablet state machine             │
//! │  • txn       - Commit/durable counters          │
//! │  • compactor - Shared compaction + FragDag      │
//! │  • meta      - Routing client + meta cache      │
//! │  • ports     - Schema/config/fragment seams     │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod compactor;
pub mod disk;
pub mod gc;
pub mod meta;
pub mod ports;
pub mod scanner;
pub mod server;
pub mod tablet;
pub mod txn;
pub mod worker;

pub use client::TabletServerClient;
pub use compactor::{CompactionHost, CompactionJob, FragDag, SharedCompactor};
pub use disk::{DiskFragmentFactory, DiskFragmentLoader};
pub use gc::{FragmentHandle, LocalFragmentGc};
pub use meta::{MetaCache, MetaEntry, MetaTable};
pub use ports::{
    FragmentFactory, FragmentLoader, SchemaReader, StaticSchemaReader, TableOpener, TableSchema,
};
pub use server::{ApplyTicket, OpTicket, ServerBits, SyncTicket, TabletServer, Ticket};
pub use tablet::{Tablet, TabletState};
pub use txn::{TransactionCounter, MAX_TXN};
pub use worker::WorkerPool;
