//! HNSW insertion algorithm.
//!
//! Inserts a vector into the graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper).

use crate::error::Result;
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::{descend_to, search_layer, with_visited};
use std::collections::HashSet;

impl HnswIndex {
    /// Insert a vector under the next dense handle and return that handle.
    ///
    /// Fails with `CapacityExceeded` once `len() == capacity()` and with
    /// `DimensionMismatch` for a wrong width; the graph is untouched on error.
    pub fn insert(&mut self, vector: &[f32]) -> Result<u32> {
        self.check_insert(vector)?;
        let internal_id = self.len() as u32;
        let level = self.random_level();

        let Some(entry_point) = self.entry_point else {
            self.push_node(vector, vec![Vec::new(); level + 1], level);
            self.entry_point = Some(internal_id);
            self.max_layer = level;
            return Ok(internal_id);
        };

        // Phase 1 + 2: descend to the node's level, then collect neighbor lists
        // for every layer it shares with the graph.
        let top = level.min(self.max_layer);
        let node_neighbors = with_visited(self.len(), |visited| {
            let current_ep = descend_to(self, vector, entry_point, level, visited);

            let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
            let mut layer_eps: Vec<u32> = vec![current_ep];
            for layer in (0..=top).rev() {
                let candidates = search_layer(
                    self,
                    vector,
                    &layer_eps,
                    self.config.ef_construction,
                    layer,
                    visited,
                );

                let selected = select_neighbors_heuristic(self, &candidates, self.max_links(layer));
                node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

                layer_eps.clear();
                layer_eps.extend(candidates.iter().map(|&(_, id)| id));
                if layer_eps.is_empty() {
                    layer_eps.push(entry_point);
                }
            }
            node_neighbors
        });

        self.push_node(vector, node_neighbors, level);

        // Phase 3: add back-links and prune neighbors that went over capacity
        for layer in 0..=top {
            let m_max = self.max_links(layer);
            let my_neighbors = self.neighbors[internal_id as usize][layer].clone();
            for neighbor_id in my_neighbors {
                let nid = neighbor_id as usize;
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let pruned = {
                        let base = self.vector(neighbor_id);
                        let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                            .iter()
                            .map(|&cid| (self.config.space.distance(base, self.vector(cid)), cid))
                            .collect();
                        select_neighbors_heuristic(self, &candidates, m_max)
                    };
                    self.neighbors[nid][layer] = pruned.into_iter().map(|(_, id)| id).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }
        Ok(internal_id)
    }

    /// Link budget per node at `layer`: `m_max0` at layer 0, `m` above.
    #[inline]
    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    fn push_node(&mut self, vector: &[f32], neighbors: Vec<Vec<u32>>, level: usize) {
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(neighbors);
        self.layers.push(level as u8);
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// A candidate is kept only if it is closer to the base node than to any
/// neighbor already kept, which spreads links across directions instead of
/// clustering them. Remaining slots are filled with the closest unused
/// candidates.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let space = index.config.space;
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);

    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let cand = index.vector(cid);
        let is_diverse = selected
            .iter()
            .all(|&(_, sid)| dist_to_base <= space.distance(cand, index.vector(sid)));
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let taken: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !taken.contains(&cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
