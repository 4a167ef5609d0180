//! Multi-index manager: maps stable names to durable indices.
//!
//! The manager enforces name validity and uniqueness, owns the data root
//! layout (one subdirectory per index), and guarantees that at most one
//! [`DurableIndex`] exists per directory within a process. Indices are
//! shared-owned: `get` hands out an `Arc`, so a deleted index stays usable
//! by in-flight callers until the last reference drops.

use crate::config;
use crate::error::{Error, Result};
use crate::storage::index::{DurableIndex, IndexConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Named collection of durable indices under one data root.
pub struct IndexManager {
    root: PathBuf,
    indices: RwLock<HashMap<String, Arc<DurableIndex>>>,
}

impl IndexManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            indices: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Load every index stored under the data root.
    ///
    /// Plain files and dot-prefixed entries are ignored. Any index that
    /// fails to load aborts the whole startup rather than serving a
    /// partial view of the data.
    pub fn load_all(&self) -> Result<()> {
        let mut indices = self.indices.write();

        tracing::info!(root = %self.root.display(), "loading indices");
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!(?raw, "skipping directory with non-UTF-8 name");
                    continue;
                }
            };
            if name.starts_with('.') {
                continue;
            }

            tracing::info!(index = %name, "loading index");
            if indices.contains_key(&name) {
                return Err(Error::Internal(format!("index {name:?} already loaded")));
            }
            let index = DurableIndex::load(entry.path())?;
            indices.insert(name, Arc::new(index));
        }

        tracing::info!(count = indices.len(), "all indices loaded");
        Ok(())
    }

    /// Look up an index by name.
    pub fn get(&self, name: &str) -> Option<Arc<DurableIndex>> {
        self.indices.read().get(name).cloned()
    }

    /// Create a new index and persist its initial (empty) snapshot.
    pub fn create(&self, name: &str, config: IndexConfig) -> Result<Arc<DurableIndex>> {
        validate_name(name)?;

        let mut indices = self.indices.write();
        if indices.contains_key(name) {
            return Err(Error::AlreadyExists(format!("index {name:?}")));
        }

        let dir = self.root.join(name);
        if dir.exists() {
            return Err(Error::AlreadyExists(format!(
                "index directory {}",
                dir.display()
            )));
        }

        let index = Arc::new(DurableIndex::create(dir, config)?);
        index.save()?;
        indices.insert(name.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// Snapshot the named index to disk.
    pub fn persist(&self, name: &str) -> Result<()> {
        let indices = self.indices.read();
        let index = indices
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("index {name:?}")))?;
        index.save()
    }

    /// Remove an index from memory and recursively delete its directory.
    /// Callers still holding an `Arc` keep the in-memory object alive, but
    /// its storage is gone.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut indices = self.indices.write();
        let index = indices
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("index {name:?}")))?;

        match fs::remove_dir_all(index.dir()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Snapshot of all index names; order is not specified.
    pub fn names(&self) -> Vec<String> {
        self.indices.read().keys().cloned().collect()
    }

    /// Number of loaded indices.
    pub fn len(&self) -> usize {
        self.indices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.read().is_empty()
    }
}

/// Names are 1–255 bytes of `[a-zA-Z0-9_-]`.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= config::MAX_INDEX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid index name {name:?}")))
    }
}
