//! HNSW graph structure.
//!
//! [`HnswGraph`] stores vectors in a contiguous Struct-of-Arrays layout for
//! cache-friendly traversal: one f32 arena for vector data plus parallel
//! per-node arrays for neighbors, layer assignment, and deletion marks.
//! Nodes are addressed internally by dense slot numbers; caller-visible
//! labels map to slots through `label_slots`.

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::distance::Metric;
use crate::snapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn unseeded_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

/// An HNSW graph over fixed-dimension f32 vectors with u32 labels.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    pub(crate) metric: Metric,
    pub(crate) dim: usize,
    pub(crate) capacity: usize,
    /// Bidirectional links per node above layer 0.
    pub(crate) m: usize,
    /// Link budget at layer 0, conventionally `2 * m`.
    pub(crate) m_max0: usize,
    pub(crate) ef_construction: usize,
    pub(crate) ef_search: usize,
    pub(crate) seed: u64,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    // SoA arenas, all indexed by slot
    pub(crate) vectors: Vec<f32>,
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>, // [slot][layer][neighbor slots]
    pub(crate) layers: Vec<u8>,
    pub(crate) deleted: Vec<bool>,
    /// slot → label
    pub(crate) slot_labels: Vec<u32>,
    /// label → slot
    pub(crate) label_slots: HashMap<u32, u32>,
    /// Layer-assignment RNG; reseeded from `seed` on load, not serialized.
    #[serde(skip, default = "unseeded_rng")]
    pub(crate) level_rng: StdRng,
}

impl HnswGraph {
    pub fn new(
        metric: Metric,
        dim: usize,
        capacity: usize,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Self {
        Self {
            metric,
            dim,
            capacity,
            m,
            m_max0: m * 2,
            ef_construction,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            seed,
            entry_point: None,
            max_layer: 0,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            slot_labels: Vec::new(),
            label_slots: HashMap::new(),
            level_rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of slots ever allocated, including deleted ones.
    pub fn slot_count(&self) -> usize {
        self.slot_labels.len()
    }

    /// Number of live (non-deleted) elements.
    pub fn live_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    pub fn contains(&self, label: u32) -> bool {
        self.label_slots.contains_key(&label)
    }

    pub fn set_ef(&mut self, ef: usize) {
        self.ef_search = ef;
    }

    pub fn ef(&self) -> usize {
        self.ef_search
    }

    #[inline]
    pub(crate) fn vector(&self, slot: u32) -> &[f32] {
        let start = slot as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    #[inline]
    pub(crate) fn is_deleted(&self, slot: u32) -> bool {
        self.deleted[slot as usize]
    }

    /// Soft-delete a label. Unknown labels are accepted as a no-op.
    pub fn mark_deleted(&mut self, label: u32) {
        if let Some(&slot) = self.label_slots.get(&label) {
            self.deleted[slot as usize] = true;
        }
    }

    /// Draw a layer for a new node from the exponential distribution
    /// `floor(-ln(uniform) / ln(m))`, capped at the layer budget.
    pub(crate) fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.m as f64).ln();
        let r: f64 = self.level_rng.gen();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(config::HNSW_MAX_LAYERS - 1)
    }

    /// Write a full snapshot to `path` as sealed bincode. Not atomic;
    /// the durable index layer writes to a temp path and renames.
    pub fn save(&self, path: &Path) -> Result<()> {
        snapshot::write_sealed(path, self)
    }

    /// Load a snapshot written by [`save`](Self::save), validating internal
    /// consistency before accepting it.
    pub fn load(path: &Path) -> Result<Self> {
        let mut graph: HnswGraph = snapshot::read_sealed(path)?;
        graph.validate().map_err(|detail| {
            Error::Corruption(format!("{}: {detail}", path.display()))
        })?;
        // The serialized form carries no RNG state; derive a fresh stream
        // that does not repeat the levels already drawn.
        graph.level_rng =
            StdRng::seed_from_u64(graph.seed.wrapping_add(graph.slot_count() as u64));
        Ok(graph)
    }

    /// Check that all parallel arrays agree and every graph reference is in
    /// bounds after deserialization.
    fn validate(&self) -> std::result::Result<(), String> {
        let n = self.slot_labels.len();

        if self.dim == 0 {
            return Err("dimension is zero".into());
        }
        if self.vectors.len() != n * self.dim {
            return Err(format!(
                "vector arena length {} != slots({n}) * dim({})",
                self.vectors.len(),
                self.dim
            ));
        }
        if self.neighbors.len() != n || self.layers.len() != n || self.deleted.len() != n {
            return Err(format!(
                "parallel array mismatch: neighbors={} layers={} deleted={} slots={n}",
                self.neighbors.len(),
                self.layers.len(),
                self.deleted.len()
            ));
        }
        if self.label_slots.len() != n {
            return Err(format!(
                "label map has {} entries for {n} slots",
                self.label_slots.len()
            ));
        }
        for (&label, &slot) in &self.label_slots {
            if slot as usize >= n {
                return Err(format!("label {label} maps to out-of-bounds slot {slot}"));
            }
            if self.slot_labels[slot as usize] != label {
                return Err(format!("label map asymmetry at label {label}"));
            }
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= n {
                return Err(format!("entry point {ep} >= slot count {n}"));
            }
        }
        for (slot, per_layer) in self.neighbors.iter().enumerate() {
            for (layer, links) in per_layer.iter().enumerate() {
                for &link in links {
                    if link as usize >= n {
                        return Err(format!(
                            "neighbor {link} out of bounds at slot {slot} layer {layer}"
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
