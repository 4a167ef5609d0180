//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! [`HnswIndex`] is the narrow capability surface the rest of the engine
//! consumes: init, load, save, add, mark-delete, search, set-ef. It owns a
//! [`graph::HnswGraph`] and applies the space semantics on top of it.
//! Cosine spaces are realized as inner product over unit-normalized
//! vectors, with normalization applied on every add and every query.
//!
//! The graph uses a Struct-of-Arrays layout for cache-friendly access: all
//! vector floats live contiguously in one arena, with parallel arrays for
//! neighbor lists, layer assignments, and deletion marks.

/// Distance metrics evaluated between raw vectors.
pub mod distance;
/// HNSW graph structure and snapshot serialization.
pub mod graph;
/// Insertion with bidirectional connections and heuristic pruning.
mod insert;
/// Single-layer search and multi-layer KNN.
mod search;
/// Epoch-based visited set for graph traversal.
mod visited;

use crate::config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

pub use distance::Metric;
pub use graph::HnswGraph;

/// Vector space an index is created in, fixed for the index's lifetime.
///
/// `Cosine` is stored in metadata as its own kind even though the graph
/// realizes it as [`Metric::InnerProduct`], so normalization keeps being
/// applied after a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceKind {
    L2,
    InnerProduct,
    Cosine,
}

impl SpaceKind {
    /// The graph-level metric realizing this space.
    pub fn metric(self) -> Metric {
        match self {
            SpaceKind::L2 => Metric::L2,
            SpaceKind::InnerProduct | SpaceKind::Cosine => Metric::InnerProduct,
        }
    }
}

impl std::fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpaceKind::L2 => write!(f, "l2"),
            SpaceKind::InnerProduct => write!(f, "ip"),
            SpaceKind::Cosine => write!(f, "cosine"),
        }
    }
}

/// A single KNN search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u32,
    pub distance: f32,
}

/// An HNSW graph bound to its vector space.
#[derive(Debug)]
pub struct HnswIndex {
    space: SpaceKind,
    graph: HnswGraph,
}

impl HnswIndex {
    /// Create a fresh, empty index.
    pub fn init(
        space: SpaceKind,
        dim: usize,
        capacity: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Self {
        Self {
            space,
            graph: HnswGraph::new(space.metric(), dim, capacity, m, ef_construction, seed),
        }
    }

    /// Load a graph snapshot and bind it to `space`.
    ///
    /// The snapshot must agree with the configured dimension and metric;
    /// the configured capacity is authoritative and replaces the stored one.
    pub fn load(path: &Path, space: SpaceKind, dim: usize, capacity: usize) -> Result<Self> {
        let mut graph = HnswGraph::load(path)?;
        if graph.dim != dim {
            return Err(Error::InvalidArgument(format!(
                "graph snapshot has dimension {}, index is configured for {dim}",
                graph.dim
            )));
        }
        if graph.metric != space.metric() {
            return Err(Error::InvalidArgument(format!(
                "graph snapshot metric {:?} does not match space {space}",
                graph.metric
            )));
        }
        graph.capacity = capacity;
        Ok(Self { space, graph })
    }

    /// Write a full graph snapshot to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.graph.save(path)
    }

    /// Add `vector` under `label`, normalizing first in cosine spaces.
    pub fn add(&mut self, vector: &[f32], label: u32) -> Result<()> {
        let vector = self.prepared(vector);
        self.graph.insert(label, &vector)
    }

    /// Soft-delete `label`; unknown labels are accepted as a no-op.
    pub fn mark_delete(&mut self, label: u32) {
        self.graph.mark_deleted(label);
    }

    /// KNN search returning up to `k` live labels, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let query = self.prepared(query);
        search::knn_search(&self.graph, &query, k)
            .into_iter()
            .map(|(distance, slot)| Neighbor {
                id: self.graph.slot_labels[slot as usize],
                distance,
            })
            .collect()
    }

    /// Set the query-time candidate list size.
    pub fn set_ef(&mut self, ef: usize) {
        self.graph.set_ef(ef);
    }

    pub fn ef(&self) -> usize {
        self.graph.ef()
    }

    pub fn space(&self) -> SpaceKind {
        self.space
    }

    /// Number of live (non-deleted) elements.
    pub fn live_count(&self) -> usize {
        self.graph.live_count()
    }

    pub fn contains(&self, label: u32) -> bool {
        self.graph.contains(label)
    }

    fn prepared<'a>(&self, vector: &'a [f32]) -> Cow<'a, [f32]> {
        match self.space {
            SpaceKind::Cosine => Cow::Owned(unit_normalized(vector)),
            _ => Cow::Borrowed(vector),
        }
    }
}

/// Scale `vector` to unit Euclidean length. The epsilon floor keeps the
/// zero vector at zero instead of producing NaNs.
fn unit_normalized(vector: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vector.iter().map(|&v| v * v).sum();
    let inv = 1.0 / (norm_sq.sqrt() + config::COSINE_NORM_EPSILON);
    vector.iter().map(|&v| v * inv).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_search_finds_identical_vector_at_zero_distance() {
        let mut index = HnswIndex::init(SpaceKind::Cosine, 5, 100, 16, 200, 42);
        index.add(&[0.1, 0.2, 0.3, 0.4, 0.5], 1).unwrap();
        index.add(&[0.9, 0.8, 0.7, 0.6, 0.5], 2).unwrap();

        let hits = index.search(&[0.1, 0.2, 0.3, 0.4, 0.5], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].distance.abs() < 1e-6, "got {}", hits[0].distance);
        assert_eq!(hits[1].id, 2);
        assert!(hits[1].distance > 0.0);
    }

    #[test]
    fn cosine_magnitude_is_irrelevant() {
        let mut index = HnswIndex::init(SpaceKind::Cosine, 3, 10, 8, 50, 1);
        index.add(&[1.0, 0.0, 0.0], 1).unwrap();
        index.add(&[0.0, 1.0, 0.0], 2).unwrap();

        // A scaled copy of vector 1 must still land on it at distance ~0.
        let hits = index.search(&[250.0, 0.0, 0.0], 1);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_stays_finite() {
        let mut index = HnswIndex::init(SpaceKind::Cosine, 4, 10, 8, 50, 1);
        index.add(&[0.0, 0.0, 0.0, 0.0], 1).unwrap();
        index.add(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();

        let hits = index.search(&[0.0, 0.0, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        for hit in hits {
            assert!(hit.distance.is_finite(), "{} is not finite", hit.distance);
        }
    }

    #[test]
    fn l2_space_does_not_normalize() {
        let mut index = HnswIndex::init(SpaceKind::L2, 2, 10, 8, 50, 1);
        index.add(&[0.0, 3.0], 1).unwrap();
        index.add(&[0.0, 30.0], 2).unwrap();

        let hits = index.search(&[0.0, 0.0], 2);
        assert_eq!(hits[0].id, 1);
        assert!((hits[0].distance - 9.0).abs() < 1e-4);
    }

    #[test]
    fn mark_delete_excludes_from_results() {
        let mut index = HnswIndex::init(SpaceKind::L2, 2, 10, 8, 50, 1);
        index.add(&[0.0, 0.0], 1).unwrap();
        index.add(&[1.0, 0.0], 2).unwrap();
        index.mark_delete(1);

        let hits = index.search(&[0.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn mark_delete_unknown_label_leaves_results_unchanged() {
        let mut index = HnswIndex::init(SpaceKind::L2, 2, 10, 8, 50, 1);
        index.add(&[0.0, 0.0], 1).unwrap();
        index.mark_delete(999);

        let hits = index.search(&[0.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn save_load_preserves_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");

        let mut index = HnswIndex::init(SpaceKind::Cosine, 4, 100, 16, 100, 9);
        for i in 0..50u32 {
            let f = i as f32;
            index.add(&[f.sin(), f.cos(), f * 0.1, 1.0], i).unwrap();
        }
        index.save(&path).unwrap();

        let loaded = HnswIndex::load(&path, SpaceKind::Cosine, 4, 100).unwrap();
        let query = [0.3, -0.2, 0.8, 0.1];
        let before: Vec<u32> = index.search(&query, 10).iter().map(|h| h.id).collect();
        let after: Vec<u32> = loaded.search(&query, 10).iter().map(|h| h.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let index = HnswIndex::init(SpaceKind::L2, 4, 10, 8, 50, 1);
        index.save(&path).unwrap();

        let err = HnswIndex::load(&path, SpaceKind::L2, 8, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
    }

    #[test]
    fn load_rejects_metric_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let index = HnswIndex::init(SpaceKind::L2, 4, 10, 8, 50, 1);
        index.save(&path).unwrap();

        let err = HnswIndex::load(&path, SpaceKind::Cosine, 4, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
    }
}
