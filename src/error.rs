//! Error types shared by the whole engine.
//!
//! The set of error kinds is closed: every failure a caller can observe maps
//! onto one of these variants, and the facade layers preserve the originating
//! kind when re-surfacing an error from a lower layer.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("output buffer too small, {0} bytes required")]
    MoreData(usize),

    #[error("invalid handle")]
    InvalidHandle,

    #[error("stream data violates on-disk invariants: {0}")]
    InvalidData(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no more items")]
    NoMoreItems,

    #[error("unknown summary property id {0}")]
    UnknownProperty(u32),

    #[error("bad query syntax: {0}")]
    BadQuerySyntax(String),

    #[error("no such column: {0}")]
    InvalidField(String),

    #[error("no such table: {0}")]
    InvalidTable(String),

    #[error("operation failed: {0}")]
    FunctionFailed(String),

    #[error("value type incompatible with column or property: {0}")]
    DatatypeMismatch(String),

    #[error("invalid datatype: {0}")]
    InvalidDatatype(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for the catch-all runtime failure kind.
    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        Error::FunctionFailed(msg.into())
    }
}
