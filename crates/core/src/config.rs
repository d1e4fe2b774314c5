//! Global configuration constants and the runtime index configuration.
//!
//! Defaults, input validation limits, and artifact file names are compile-time
//! constants. Per-index tuning is carried by [`AnnIndexConfig`], which is fixed
//! when the controller is constructed.

use crate::error::{AnnError, Result};
use crate::hnsw::Space;
use serde::{Deserialize, Serialize};

/// Default number of bidirectional links per HNSW node (layers above 0).
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const DEFAULT_EF_SEARCH: usize = 100;

/// Default hard capacity of a freshly built graph (1M profiles).
pub const DEFAULT_MAX_ELEMENTS: usize = 1_000_000;

/// Maximum number of layers in the HNSW graph.
pub const DEFAULT_MAX_LAYERS: usize = 16;

/// Extra candidates requested on top of `k + |exclude|` when a query
/// carries an exclusion set.
pub const QUERY_OVERFETCH_MARGIN: usize = 10;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Graph binary inside an artifact directory.
pub const INDEX_FILE: &str = "index.bin";

/// Identifier map + metadata sidecar inside an artifact directory.
pub const MAPPINGS_FILE: &str = "mappings.json";

/// Embedding matrix inside an embedding directory.
pub const EMBEDDINGS_FILE: &str = "embeddings.npy";

/// External ID list inside an embedding directory, parallel to the matrix rows.
pub const USER_IDS_FILE: &str = "user_ids.json";

/// Immutable parameter set of an [`AnnIndex`](crate::AnnIndex).
///
/// Trades build time, query latency, and memory against recall. All values are
/// fixed at construction; `build()` and `load()` never change them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnIndexConfig {
    /// Similarity space the graph is built against.
    pub space: Space,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Maximum links per node per layer (layer 0 allows `2 * m`).
    pub m: usize,
    /// Candidate list size during search.
    pub ef_search: usize,
    /// Lower bound on graph capacity. A build resolves capacity to
    /// `max(N, max_elements)`.
    pub max_elements: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Seed for layer assignment. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for AnnIndexConfig {
    fn default() -> Self {
        Self {
            space: Space::Cosine,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            m: DEFAULT_M,
            ef_search: DEFAULT_EF_SEARCH,
            max_elements: DEFAULT_MAX_ELEMENTS,
            max_layers: DEFAULT_MAX_LAYERS,
            seed: None,
        }
    }
}

impl AnnIndexConfig {
    /// Checks every parameter against the ranges the graph can work with.
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(AnnError::InvalidConfig(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(AnnError::InvalidConfig(
                "ef_construction must be > 0".to_string(),
            ));
        }
        if self.ef_search == 0 {
            return Err(AnnError::InvalidConfig("ef_search must be > 0".to_string()));
        }
        if self.max_elements == 0 {
            return Err(AnnError::InvalidConfig(
                "max_elements must be > 0".to_string(),
            ));
        }
        if self.max_layers == 0 || self.max_layers > u8::MAX as usize {
            return Err(AnnError::InvalidConfig(format!(
                "max_layers must be in 1..={}, got {}",
                u8::MAX,
                self.max_layers
            )));
        }
        Ok(())
    }
}
