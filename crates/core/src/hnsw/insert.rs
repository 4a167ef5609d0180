//! HNSW insertion.
//!
//! Three-phase insert with bidirectional links and heuristic neighbor
//! pruning (Algorithm 4 from the HNSW paper): greedy descent from the top
//! layer, per-layer candidate search with `ef_construction`, then link
//! back-patching with pruning of over-capacity neighbor lists.

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use std::cell::RefCell;

thread_local! {
    /// Reused per-thread visited set; avoids a fresh allocation per insert.
    static INSERT_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

impl HnswGraph {
    /// Insert `vector` under `label`.
    ///
    /// Re-inserting an existing label replaces its vector in place and
    /// clears any deletion mark; the graph topology is left unchanged.
    /// Errors when the configured capacity is exhausted.
    pub fn insert(&mut self, label: u32, vector: &[f32]) -> Result<()> {
        debug_assert_eq!(vector.len(), self.dim);

        if let Some(&slot) = self.label_slots.get(&label) {
            let start = slot as usize * self.dim;
            self.vectors[start..start + self.dim].copy_from_slice(vector);
            self.deleted[slot as usize] = false;
            return Ok(());
        }

        if self.slot_count() >= self.capacity {
            return Err(Error::Internal(format!(
                "index capacity exhausted ({} elements)",
                self.capacity
            )));
        }

        let slot = self.slot_count() as u32;
        let level = self.random_level();

        // First node: no links to build.
        if self.entry_point.is_none() {
            self.push_node(label, vector, level, vec![Vec::new(); level + 1]);
            self.entry_point = Some(slot);
            self.max_layer = level;
            return Ok(());
        }

        let entry_point = self.entry_point.expect("entry point set for non-empty graph");
        let top = level.min(self.max_layer);

        // Phases 1 & 2 only read the graph; collect the new node's neighbor
        // lists before mutating anything.
        let node_neighbors = INSERT_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.grow(self.slot_count());

            // Phase 1: greedy descent from the top layer to level + 1.
            let mut current_ep = entry_point;
            for layer in (level + 1..=self.max_layer).rev() {
                let found = search_layer(
                    self,
                    vector,
                    std::slice::from_ref(&current_ep),
                    1,
                    layer,
                    &mut visited,
                );
                if let Some(&(_, nearest)) = found.first() {
                    current_ep = nearest;
                }
            }

            // Phase 2: collect candidates per layer from `top` down.
            let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
            let mut layer_eps: Vec<u32> = vec![current_ep];
            for layer in (0..=top).rev() {
                let candidates = search_layer(
                    self,
                    vector,
                    &layer_eps,
                    self.ef_construction,
                    layer,
                    &mut visited,
                );

                let m_max = if layer == 0 { self.m_max0 } else { self.m };
                let selected = select_neighbors_heuristic(self, &candidates, m_max);
                node_neighbors[layer] = selected.iter().map(|&(_, s)| s).collect();

                layer_eps.clear();
                layer_eps.extend(candidates.iter().map(|&(_, s)| s));
                if layer_eps.is_empty() {
                    layer_eps.push(entry_point);
                }
            }

            node_neighbors
        });

        self.push_node(label, vector, level, node_neighbors);

        // Phase 3: back-link from each selected neighbor and prune lists
        // that exceed their layer budget.
        for layer in 0..=top {
            let m_max = if layer == 0 { self.m_max0 } else { self.m };

            let new_links: Vec<u32> = self.neighbors[slot as usize][layer].clone();
            for &neighbor in &new_links {
                let n = neighbor as usize;
                while self.neighbors[n].len() <= layer {
                    self.neighbors[n].push(Vec::new());
                }
                self.neighbors[n][layer].push(slot);

                if self.neighbors[n][layer].len() > m_max {
                    let base = neighbor;
                    let candidates: Vec<(f32, u32)> = self.neighbors[n][layer]
                        .iter()
                        .map(|&other| {
                            let d = self
                                .metric
                                .distance(self.vector(base), self.vector(other));
                            (d, other)
                        })
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[n][layer] = pruned.iter().map(|&(_, s)| s).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(slot);
        }
        Ok(())
    }

    fn push_node(&mut self, label: u32, vector: &[f32], level: usize, links: Vec<Vec<u32>>) {
        let slot = self.slot_count() as u32;
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(links);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.slot_labels.push(label);
        self.label_slots.insert(label, slot);
    }
}

/// Heuristic neighbor selection (Algorithm 4).
///
/// A candidate is kept only when it is closer to the base point than to any
/// already-selected neighbor, which favors diverse links over clusters of
/// near-identical ones. Remaining slots are topped up with the closest
/// unused candidates.
fn select_neighbors_heuristic(
    graph: &HnswGraph,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cand) in &sorted {
        if selected.len() >= m {
            break;
        }
        let cand_vec = graph.vector(cand);
        let diverse = selected.iter().all(|&(_, kept)| {
            dist_to_base <= graph.metric.distance(cand_vec, graph.vector(kept))
        });
        if diverse {
            selected.push((dist_to_base, cand));
        }
    }

    if selected.len() < m {
        let kept: std::collections::HashSet<u32> = selected.iter().map(|&(_, s)| s).collect();
        for &(dist, cand) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !kept.contains(&cand) {
                selected.push((dist, cand));
            }
        }
    }

    selected
}
