//! # vicinity-core
//!
//! Persistent HNSW vector index engine: the graph, the write-ahead log,
//! the durable index combining the two, and the multi-index manager.
//!
//! This is the synchronous core library with zero async dependencies;
//! the gRPC surface lives in `vicinity-server`.

/// Global configuration constants: limits, defaults, and file names.
pub mod config;
/// Error kinds shared across the engine.
pub mod error;
/// HNSW approximate nearest neighbor index.
pub mod hnsw;
/// Durable indices, the write-ahead log, and the index manager.
pub mod storage;

pub(crate) mod snapshot;

pub use error::{Error, Result};
