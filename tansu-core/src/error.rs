//! Error types for Tansu operations.
//!
//! Errors carry enough context to act on (paths, row ranges, limits) and
//! are delivered through completion channels rather than thrown across
//! thread boundaries.

use thiserror::Error;

/// Result type alias for Tansu operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Tansu
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input: bad predicate syntax, a URI outside the data root,
    /// an invalid config bound.
    #[error("invalid value: {message}")]
    Value { message: String },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Checksum mismatch, version mismatch, or unreadable footer in a
    /// fragment or log file. Fatal for that file.
    #[error("corruption detected: {message}")]
    Corruption { message: String },

    #[error("table not loaded: {name}")]
    TableNotLoaded { name: String },

    #[error("tablet not loaded: {name}")]
    TabletNotLoaded { name: String },

    /// Optimistic commit check failed: a row was modified after the
    /// caller's commitMaxTxn.
    #[error("mutation conflict: row modified after txn {max_txn}")]
    MutationConflict { max_txn: i64 },

    /// Unrecoverable internal state: uncorrectable meta overlap, writes to
    /// a finished fragment writer, server shutdown mid-operation.
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    pub fn value(message: impl Into<String>) -> Self {
        Error::Value { message: message.into() }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption { message: message.into() }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime { message: message.into() }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { message: message.into(), source }
    }

    /// Check if the error leaves the containing component usable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Value { .. } => true,
            Error::MutationConflict { .. } => true,
            Error::TableNotLoaded { .. } => true,
            Error::TabletNotLoaded { .. } => true,
            Error::Io { .. } => false,
            Error::Corruption { .. } => false,
            Error::Runtime { .. } => false,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Value { .. } => "VALUE_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::TableNotLoaded { .. } => "TABLE_NOT_LOADED",
            Error::TabletNotLoaded { .. } => "TABLET_NOT_LOADED",
            Error::MutationConflict { .. } => "MUTATION_CONFLICT",
            Error::Runtime { .. } => "RUNTIME_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
