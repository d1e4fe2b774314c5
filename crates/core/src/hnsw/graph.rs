//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the graph tuning parameters (M, ef_construction,
//! ef_search, similarity space). [`HnswIndex`] stores the graph in a
//! Struct-of-Arrays layout: all vectors sit contiguously in one arena addressed
//! by dense `u32` handles, with parallel arrays for neighbor lists and layer
//! assignments.

use crate::config::AnnIndexConfig;
use crate::error::{AnnError, Result};
use crate::hnsw::distance::Space;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Tuning parameters of a single graph instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node (except layer 0, which uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (`2 * m`).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Distance function for similarity computation.
    pub space: Space,
}

impl From<&AnnIndexConfig> for HnswConfig {
    fn from(c: &AnnIndexConfig) -> Self {
        Self {
            m: c.m,
            m_max0: c.m * 2,
            ef_construction: c.ef_construction,
            ef_search: c.ef_search,
            max_layers: c.max_layers,
            space: c.space,
        }
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::from(&AnnIndexConfig::default())
    }
}

fn fresh_rng() -> StdRng {
    StdRng::from_entropy()
}

/// HNSW graph over dense internal handles `0..len()`.
///
/// Never sees external identifiers. Capacity is fixed at construction and
/// inserts past it fail with [`AnnError::CapacityExceeded`].
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswIndex {
    pub config: HnswConfig,
    pub dimension: usize,
    pub capacity: usize,
    // SoA: f32 vector arena, `dimension` floats per node
    pub vectors: Vec<f32>,
    // SoA: graph structure
    pub neighbors: Vec<Vec<Vec<u32>>>, // [node_id][layer][neighbor_ids]
    pub layers: Vec<u8>,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    #[serde(skip, default = "fresh_rng")]
    rng: StdRng,
}

impl HnswIndex {
    /// Creates an empty graph that accepts at most `capacity` vectors.
    ///
    /// Memory is not reserved up front; call [`reserve`](Self::reserve) when the
    /// element count is known.
    pub fn with_capacity(
        dimension: usize,
        capacity: usize,
        config: HnswConfig,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => fresh_rng(),
        };
        Self {
            config,
            dimension,
            capacity,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng,
        }
    }

    /// Reserves arena space for `additional` more vectors, clamped to capacity.
    pub fn reserve(&mut self, additional: usize) {
        let room = self.capacity.saturating_sub(self.len());
        let n = additional.min(room);
        self.vectors.reserve(n * self.dimension);
        self.neighbors.reserve(n);
        self.layers.reserve(n);
    }

    /// Number of inserted vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn space(&self) -> Space {
        self.config.space
    }

    /// Sets the query-time beam width.
    pub fn set_ef(&mut self, ef_search: usize) {
        self.config.ef_search = ef_search.max(1);
    }

    /// Raw vector stored under `id`. O(1) slice into the arena.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Layer assignment for a new node: `floor(-ln(U) / ln(M))`, capped at
    /// `max_layers - 1`.
    pub fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        // gen() yields [0, 1); flip to (0, 1] so ln() stays finite
        let r: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Rejects inserts the graph cannot hold before any state is touched.
    pub(crate) fn check_insert(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.len() >= self.capacity {
            return Err(AnnError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Validate internal invariants after deserialization.
    ///
    /// Checks that the parallel arrays agree on the node count, that every
    /// neighbor id and the entry point are in bounds, and that no node has more
    /// layers than it was assigned.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let n = self.layers.len();
        let dim = self.dimension;

        if dim == 0 {
            return Err("dimension is 0".to_string());
        }
        if n > self.capacity {
            return Err(format!("node_count {} > capacity {}", n, self.capacity));
        }
        if self.vectors.len() != n * dim {
            return Err(format!(
                "vectors length {} != node_count({}) * dimension({})",
                self.vectors.len(),
                n,
                dim
            ));
        }
        if self.neighbors.len() != n {
            return Err(format!(
                "neighbors length {} != node_count {}",
                self.neighbors.len(),
                n
            ));
        }
        if self.config.m < 2 || self.config.max_layers == 0 {
            return Err(format!(
                "invalid graph parameters m={} max_layers={}",
                self.config.m, self.config.max_layers
            ));
        }
        match self.entry_point {
            Some(ep) if ep as usize >= n => {
                return Err(format!("entry_point {} >= node_count {}", ep, n));
            }
            Some(ep) if self.layers[ep as usize] as usize != self.max_layer => {
                return Err(format!(
                    "entry_point {} sits on layer {} but max_layer is {}",
                    ep, self.layers[ep as usize], self.max_layer
                ));
            }
            None if n > 0 => return Err("graph has nodes but no entry point".to_string()),
            _ => {}
        }

        for (node_id, node_neighbors) in self.neighbors.iter().enumerate() {
            if node_neighbors.len() != self.layers[node_id] as usize + 1 {
                return Err(format!(
                    "node {} has {} neighbor layers but level {}",
                    node_id,
                    node_neighbors.len(),
                    self.layers[node_id]
                ));
            }
            for (layer, layer_neighbors) in node_neighbors.iter().enumerate() {
                for &neighbor in layer_neighbors {
                    if neighbor as usize >= n {
                        return Err(format!(
                            "neighbor {} out of bounds (node_count={}) at node {} layer {}",
                            neighbor, n, node_id, layer
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> HnswConfig {
        HnswConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 32,
            ef_search: 16,
            max_layers: 8,
            space: Space::Euclidean,
        }
    }

    #[test]
    fn test_config_from_index_config_doubles_layer0_links() {
        let c = HnswConfig::from(&AnnIndexConfig {
            m: 12,
            ..AnnIndexConfig::default()
        });
        assert_eq!(c.m, 12);
        assert_eq!(c.m_max0, 24);
    }

    #[test]
    fn test_random_level_respects_cap() {
        let mut g = HnswIndex::with_capacity(
            2,
            10,
            HnswConfig {
                max_layers: 3,
                ..small_config()
            },
            Some(7),
        );
        for _ in 0..10_000 {
            assert!(g.random_level() < 3);
        }
    }

    #[test]
    fn test_random_level_biased_to_layer_zero() {
        let mut g = HnswIndex::with_capacity(2, 10, HnswConfig::default(), Some(1));
        let zeros = (0..10_000).filter(|_| g.random_level() == 0).count();
        // With M=16, P(level 0) = 1 - 1/16
        assert!(zeros > 9_000, "expected ~9375 level-0 draws, got {zeros}");
    }

    #[test]
    fn test_seeded_levels_are_reproducible() {
        let mut a = HnswIndex::with_capacity(2, 10, small_config(), Some(42));
        let mut b = HnswIndex::with_capacity(2, 10, small_config(), Some(42));
        let la: Vec<usize> = (0..100).map(|_| a.random_level()).collect();
        let lb: Vec<usize> = (0..100).map(|_| b.random_level()).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_set_ef_floors_at_one() {
        let mut g = HnswIndex::with_capacity(2, 10, small_config(), None);
        g.set_ef(0);
        assert_eq!(g.config.ef_search, 1);
        g.set_ef(250);
        assert_eq!(g.config.ef_search, 250);
    }

    #[test]
    fn test_validate_empty_ok() {
        let g = HnswIndex::with_capacity(3, 10, small_config(), None);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_validate_catches_bad_arena() {
        let mut g = HnswIndex::with_capacity(3, 10, small_config(), None);
        g.insert(&[1.0, 0.0, 0.0]).unwrap();
        g.vectors.push(0.5);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_catches_dangling_neighbor() {
        let mut g = HnswIndex::with_capacity(2, 10, small_config(), Some(3));
        g.insert(&[1.0, 0.0]).unwrap();
        g.insert(&[0.0, 1.0]).unwrap();
        g.neighbors[0][0].push(99);
        let err = g.validate().unwrap_err();
        assert!(err.contains("out of bounds"), "{err}");
    }
}
