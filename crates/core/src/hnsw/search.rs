//! HNSW search: single-layer beam search and multi-layer KNN.
//!
//! The graph is read-only during search. Visited marks come from a per-thread
//! pool, so concurrent queries against one graph share no mutable state.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

thread_local! {
    /// Reused across searches and inserts on the same thread.
    static VISITED_POOL: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Runs `f` with this thread's visited set, grown to cover `node_count` handles.
pub(crate) fn with_visited<R>(node_count: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED_POOL.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(node_count);
        f(&mut visited)
    })
}

/// `(distance, handle)` ordered by distance, ties broken by handle so results
/// are deterministic for a fixed graph.
type Scored = (OrderedFloat<f32>, u32);

/// Search a single layer of the HNSW graph.
///
/// Returns up to `ef` nodes closest to `query` at `layer`, sorted by ascending
/// distance. `visited` is cleared at the start of each call.
pub fn search_layer(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    let space = index.config.space;
    // Min-heap of nodes still to expand
    let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef * 2);
    // Max-heap of the best `ef` found so far; top is the worst kept result
    let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = OrderedFloat(space.distance(query, index.vector(ep)));
            candidates.push(Reverse((dist, ep)));
            results.push((dist, ep));
            if results.len() > ef {
                results.pop();
            }
        }
    }

    while let Some(Reverse((c_dist, c_id))) = candidates.pop() {
        if results.len() >= ef {
            if let Some(&(worst, _)) = results.peek() {
                if c_dist > worst {
                    break;
                }
            }
        }

        let Some(neighbor_list) = index.neighbors[c_id as usize].get(layer) else {
            continue;
        };

        for &neighbor_id in neighbor_list {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let dist = OrderedFloat(space.distance(query, index.vector(neighbor_id)));
            let improves = results.len() < ef || results.peek().map_or(true, |&(w, _)| dist < w);
            if improves {
                candidates.push(Reverse((dist, neighbor_id)));
                results.push((dist, neighbor_id));
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|(d, id)| (d.0, id))
        .collect()
}

/// Greedy descent from the entry point down to layer 1 with a beam of one.
/// Returns the entry point to use for the layer-0 search.
pub(crate) fn descend_to(
    index: &HnswIndex,
    query: &[f32],
    entry_point: u32,
    target_layer: usize,
    visited: &mut VisitedSet,
) -> u32 {
    let mut current = entry_point;
    for layer in (target_layer + 1..=index.max_layer).rev() {
        let nearest = search_layer(
            index,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
        );
        if let Some(&(_, id)) = nearest.first() {
            current = id;
        }
    }
    current
}

/// Multi-layer KNN search.
///
/// Descends greedily to layer 0, then runs a beam of `max(ef_search, k)` and
/// returns the `k` closest `(distance, handle)` pairs, nearest first.
pub fn knn_search(index: &HnswIndex, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let Some(entry_point) = index.entry_point else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    with_visited(index.len(), |visited| {
        let ep = descend_to(index, query, entry_point, 0, visited);
        let ef = index.config.ef_search.max(k);
        let mut results = search_layer(index, query, std::slice::from_ref(&ep), ef, 0, visited);
        results.truncate(k);
        results
    })
}

impl HnswIndex {
    /// The `k` nearest handles to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, u32)> {
        knn_search(self, query, k)
    }
}
