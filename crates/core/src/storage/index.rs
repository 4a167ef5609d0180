//! A durable HNSW index: graph + state + write-ahead log.
//!
//! Durability protocol: every mutation is appended (and fsynced) to the WAL
//! before the graph is touched, so an acknowledged write is always either in
//! the last snapshot or replayable from the log. [`DurableIndex::save`]
//! writes a full snapshot through temp files, renames them into place, and
//! only then deletes the log; a failure at any step leaves the previous
//! snapshot and log intact.
//!
//! On disk an index is either CLEAN (`state` + `index` present, no `log`)
//! or DIRTY (`log` present with zero or more records). Loading accepts both
//! and treats leftover `.tmp` files from an interrupted save as warnings:
//! the previous snapshot is still valid and anything written after it is in
//! the log.
//!
//! Locking: searches take the shared side of the index's `RwLock`,
//! mutations and `save` take the exclusive side. The graph is a plain Rust
//! structure without interior thread-safety, so mutations cannot share the
//! lock the way a self-synchronizing native library would allow.

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::{HnswIndex, Neighbor, SpaceKind};
use crate::snapshot;
use crate::storage::wal::{WalRecord, WriteAheadLog};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Index configuration, immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub space: SpaceKind,
    pub dim: u32,
    pub capacity: u64,
    pub m: u32,
    pub ef_construction: u32,
    pub seed: i32,
    /// When true, ids are generated by the index and `add_with_id` is
    /// rejected; when false, `add_auto` is rejected.
    pub auto_id: bool,
}

impl IndexConfig {
    fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidArgument("dimension must be positive".into()));
        }
        if self.dim > config::MAX_DIMENSION {
            return Err(Error::InvalidArgument(format!(
                "dimension {} exceeds the maximum of {}",
                self.dim,
                config::MAX_DIMENSION
            )));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be positive".into()));
        }
        if self.m == 0 {
            return Err(Error::InvalidArgument("m must be positive".into()));
        }
        Ok(())
    }
}

/// Serialized alongside the config in the `state` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexState {
    config: IndexConfig,
    last_auto_id: u32,
}

#[derive(Debug)]
struct IndexInner {
    graph: HnswIndex,
    /// Monotonic auto-id counter; only meaningful when `auto_id` is set.
    last_auto_id: u32,
}

/// One crash-safe index: an HNSW graph, its metadata, and its WAL.
pub struct DurableIndex {
    config: IndexConfig,
    dir: PathBuf,
    wal: WriteAheadLog,
    inner: RwLock<IndexInner>,
}

impl DurableIndex {
    /// Construct a fresh, empty index rooted at `dir`, allocating the
    /// directory. The snapshot files appear on the first save; the manager
    /// saves immediately after creation to establish them.
    pub(crate) fn create(dir: impl Into<PathBuf>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let graph = HnswIndex::init(
            config.space,
            config.dim as usize,
            config.capacity as usize,
            config.m as usize,
            config.ef_construction as usize,
            config.seed as u64,
        );
        let wal = WriteAheadLog::new(dir.join(config::WAL_FILE));
        Ok(Self {
            config,
            dir,
            wal,
            inner: RwLock::new(IndexInner {
                graph,
                last_auto_id: 0,
            }),
        })
    }

    /// Load an index from its directory: state, then graph snapshot, then
    /// WAL replay.
    pub(crate) fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        for tmp in [
            dir.join(format!("{}.tmp", config::STATE_FILE)),
            dir.join(format!("{}.tmp", config::GRAPH_FILE)),
        ] {
            if tmp.exists() {
                tracing::warn!(
                    file = %tmp.display(),
                    "ignoring leftover temporary file from an interrupted save"
                );
            }
        }

        let state: IndexState = snapshot::read_sealed(&dir.join(config::STATE_FILE))?;
        state.config.validate()?;

        let mut graph = HnswIndex::load(
            &dir.join(config::GRAPH_FILE),
            state.config.space,
            state.config.dim as usize,
            state.config.capacity as usize,
        )?;

        let wal = WriteAheadLog::new(dir.join(config::WAL_FILE));
        let (records, stats) = wal.read()?;
        if !stats.is_clean() {
            tracing::warn!(
                dir = %dir.display(),
                records = stats.records,
                truncated = stats.truncated,
                corrupt = stats.corrupt_tail,
                "write-ahead log has a damaged tail; replaying the valid prefix"
            );
        }

        let mut last_auto_id = state.last_auto_id;
        for record in &records {
            match record {
                WalRecord::PointAddition { vector, id } => {
                    if state.config.auto_id {
                        last_auto_id = last_auto_id.max(*id);
                    }
                    graph.add(vector, *id)?;
                }
                WalRecord::DeletionMark { id } => graph.mark_delete(*id),
                WalRecord::EfSetting { ef } => graph.set_ef((*ef).max(1) as usize),
            }
        }
        if !records.is_empty() {
            tracing::info!(
                dir = %dir.display(),
                records = records.len(),
                "replayed write-ahead log"
            );
        }

        Ok(Self {
            config: state.config,
            dir,
            wal,
            inner: RwLock::new(IndexInner {
                graph,
                last_auto_id,
            }),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert `vector` under a caller-chosen id. Rejected on auto-id
    /// indices.
    pub fn add_with_id(&self, vector: &[f32], id: u32) -> Result<()> {
        if self.config.auto_id {
            return Err(Error::InvalidArgument(
                "index generates ids automatically; use the auto-id insert".into(),
            ));
        }
        self.check_dim(vector)?;

        let mut inner = self.inner.write();
        self.wal.append(&WalRecord::PointAddition {
            vector: vector.to_vec(),
            id,
        })?;
        inner.graph.add(vector, id)
    }

    /// Insert `vector` under the next generated id and return it. Rejected
    /// on indices with caller-chosen ids.
    pub fn add_auto(&self, vector: &[f32]) -> Result<u32> {
        if !self.config.auto_id {
            return Err(Error::InvalidArgument(
                "index uses caller-chosen ids; use the explicit-id insert".into(),
            ));
        }
        self.check_dim(vector)?;

        let mut inner = self.inner.write();
        let id = inner.last_auto_id.checked_add(1).ok_or_else(|| {
            Error::Internal("auto-id counter exhausted".into())
        })?;
        inner.last_auto_id = id;
        self.wal.append(&WalRecord::PointAddition {
            vector: vector.to_vec(),
            id,
        })?;
        inner.graph.add(vector, id)?;
        Ok(id)
    }

    /// Soft-delete `id`. Ids that were never inserted are accepted.
    pub fn mark_delete(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.write();
        self.wal.append(&WalRecord::DeletionMark { id })?;
        inner.graph.mark_delete(id);
        Ok(())
    }

    /// Change the query-time `ef` parameter.
    pub fn set_ef(&self, ef: i32) -> Result<()> {
        if ef < 1 {
            return Err(Error::InvalidArgument(format!(
                "ef must be positive, got {ef}"
            )));
        }
        let mut inner = self.inner.write();
        self.wal.append(&WalRecord::EfSetting { ef })?;
        inner.graph.set_ef(ef as usize);
        Ok(())
    }

    /// KNN search; never touches disk.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dim(query)?;
        let inner = self.inner.read();
        Ok(inner.graph.search(query, k))
    }

    /// Snapshot the index to disk and clear the WAL.
    ///
    /// Holds the exclusive lock for the duration. Both files are written to
    /// `.tmp` paths and renamed only after both writes succeeded; the WAL
    /// is deleted last. Any failure leaves the previous snapshot and WAL as
    /// they were.
    pub fn save(&self) -> Result<()> {
        let inner = self.inner.write();

        fs::create_dir_all(&self.dir)?;

        let state_path = self.dir.join(config::STATE_FILE);
        let graph_path = self.dir.join(config::GRAPH_FILE);
        let state_tmp = self.dir.join(format!("{}.tmp", config::STATE_FILE));
        let graph_tmp = self.dir.join(format!("{}.tmp", config::GRAPH_FILE));

        let state = IndexState {
            config: self.config.clone(),
            last_auto_id: inner.last_auto_id,
        };
        snapshot::write_sealed(&state_tmp, &state)?;
        inner.graph.save(&graph_tmp)?;

        fs::rename(&state_tmp, &state_path)?;
        fs::rename(&graph_tmp, &graph_path)?;

        self.wal.delete()?;
        tracing::debug!(dir = %self.dir.display(), "index snapshot written");
        Ok(())
    }

    /// Number of live elements (excluding soft-deleted ones).
    pub fn live_count(&self) -> usize {
        self.inner.read().graph.live_count()
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dim as usize {
            return Err(Error::InvalidArgument(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.config.dim
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DurableIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableIndex")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
