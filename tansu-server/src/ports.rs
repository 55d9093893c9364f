//! Ports to external collaborators.
//!
//! The tablet server consumes schemas, fragments, and remote tables
//! through these interfaces; the disk-backed implementations live in
//! [`crate::disk`], and tests substitute their own.

use std::sync::Arc;

use tansu_core::error::Result;
use tansu_core::table::Table;
use tansu_storage::fragment::{Fragment, FragmentWriter};

/// Minimal table schema, consumed through the schema registry port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
}

pub trait SchemaReader: Send + Sync {
    fn read_schema(&self, table: &str) -> Result<TableSchema>;
}

/// Accepts every table name. Stands in until a schema registry is wired
/// up.
pub struct StaticSchemaReader;

impl SchemaReader for StaticSchemaReader {
    fn read_schema(&self, table: &str) -> Result<TableSchema> {
        Ok(TableSchema {
            name: table.to_string(),
        })
    }
}

/// Opens fragments by URI.
pub trait FragmentLoader: Send + Sync {
    fn load(&self, uri: &str) -> Result<Arc<dyn Fragment>>;
}

/// Creates fragment writers with unique URIs under a table's directory.
pub trait FragmentFactory: Send + Sync {
    fn start(&self, table: &str) -> Result<(FragmentWriter, String)>;
}

/// Opens client table handles by server location. Used by the meta
/// routing client; the transport behind it is out of scope here.
pub trait TableOpener: Send + Sync {
    fn open(&self, location: &str) -> Result<Arc<dyn Table>>;
}
