//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor graph.
//!
//! Nodes are dense `u32` handles assigned in insertion order. Each node lives on
//! a randomly drawn top layer (geometric, biased toward layer 0) and keeps up to
//! `M` links per layer (`2 * M` on layer 0). Insertion and search both descend
//! greedily from the entry point; `ef_construction` and `ef_search` set the beam
//! width at layer 0.
//!
//! The graph uses a Struct-of-Arrays (SoA) layout for cache-friendly access:
//! all vectors are stored contiguously in an arena, with separate arrays for
//! neighbor lists and layer assignments.

/// Similarity spaces: cosine, squared euclidean, and inner product.
pub mod distance;
/// HNSW graph structure, configuration, and data storage.
pub mod graph;
/// HNSW insertion algorithm with bidirectional connections and heuristic pruning.
pub mod insert;
/// HNSW search: single-layer beam search and multi-layer KNN.
pub mod search;
/// Epoch-stamped visited set for graph traversal.
pub mod visited;

pub use distance::Space;
pub use graph::{HnswConfig, HnswIndex};
pub use search::knn_search;
