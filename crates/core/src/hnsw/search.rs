//! HNSW search: single-layer best-first expansion and multi-layer KNN.
//!
//! Deleted nodes still participate in navigation (their links keep the
//! graph connected) but never appear in results.

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Expansion frontier entry: (negative distance, slot).
/// `BinaryHeap` is a max-heap; negating the distance makes it pop nearest-first.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    slot: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry: max-heap by distance so the worst result pops first.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    slot: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-first search of one layer. Returns up to `ef` live slots closest to
/// `query`, sorted by ascending distance.
pub(crate) fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.mark(ep) {
            let dist = graph.metric.distance(query, graph.vector(ep));
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                slot: ep,
            });
            if !graph.is_deleted(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    slot: ep,
                });
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let slot = candidate.slot as usize;
        if layer >= graph.neighbors[slot].len() {
            continue;
        }

        for &neighbor in &graph.neighbors[slot][layer] {
            if !visited.mark(neighbor) {
                continue;
            }
            let dist = graph.metric.distance(query, graph.vector(neighbor));
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    slot: neighbor,
                });
                if !graph.is_deleted(neighbor) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        slot: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.slot))
        .collect()
}

/// Multi-layer KNN: greedy descent with ef=1 above layer 0, then a layer-0
/// sweep with `max(ef_search, k)` candidates. Returns up to `k`
/// `(distance, slot)` pairs, ascending by distance.
pub(crate) fn knn_search(graph: &HnswGraph, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let entry_point = match graph.entry_point {
        Some(ep) => ep,
        None => return Vec::new(),
    };

    let mut visited = VisitedSet::with_capacity(graph.slot_count());
    let mut current_ep = entry_point;

    for layer in (1..=graph.max_layer).rev() {
        let found = search_layer(
            graph,
            query,
            std::slice::from_ref(&current_ep),
            1,
            layer,
            &mut visited,
        );
        if let Some(&(_, nearest)) = found.first() {
            current_ep = nearest;
        }
    }

    let ef = graph.ef().max(k);
    let mut results = search_layer(
        graph,
        query,
        std::slice::from_ref(&current_ep),
        ef,
        0,
        &mut visited,
    );
    results.truncate(k);
    results
}
