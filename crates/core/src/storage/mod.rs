//! Index lifecycle layer: write-ahead log, durable index, and manager.
//!
//! Durability combines periodic full snapshots (bincode, CRC32-sealed,
//! written via atomic temp-file + rename) with a per-index write-ahead log
//! (CRC32-framed, fsynced) covering the mutations since the last snapshot.

/// One durable index: graph + state + WAL.
pub mod index;
/// Name → durable index mapping over a data root.
pub mod manager;
/// Append-only mutation log with a tolerant reader.
pub mod wal;

pub use index::{DurableIndex, IndexConfig};
pub use manager::IndexManager;
pub use wal::{ReplayStats, WalRecord, WriteAheadLog};
