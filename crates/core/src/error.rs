//! Error types shared across the engine.
//!
//! Every fallible operation in this crate returns [`Result`]. The variants
//! correspond to the conditions a caller can act on; the gRPC facade maps
//! them 1:1 onto status codes.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied a bad name, vector, parameter, or called an
    /// operation the index configuration forbids.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An index with this name (or its directory) already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Filesystem failure. When raised on the WAL write path the enclosing
    /// mutation aborts before the graph is touched.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data failed integrity or decode checks.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A condition that should not happen under correct operation.
    #[error("internal error: {0}")]
    Internal(String),
}
