//! # profile-ann-core
//!
//! Approximate nearest-neighbor index over profile embeddings.
//!
//! An HNSW graph answers "which indexed profiles are most similar to this
//! embedding?" in sub-linear time. Every graph node is tied to an external
//! profile ID through an identifier map, and a built index can be saved to and
//! reloaded from a directory holding `index.bin` and `mappings.json`.
//!
//! ```no_run
//! use profile_ann_core::{AnnIndex, AnnIndexConfig, EmbeddingMatrix};
//!
//! # fn main() -> profile_ann_core::Result<()> {
//! let embeddings = EmbeddingMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let ids = vec!["u1".to_string(), "u2".to_string()];
//!
//! let index = AnnIndex::new(AnnIndexConfig::default(), 2)?;
//! index.build(&embeddings, &ids)?;
//! let similar = index.query(&[1.0, 0.0], 1, None)?;
//! assert_eq!(similar[0].id, "u1");
//! index.save("artifacts/ann")?;
//! # Ok(())
//! # }
//! ```

/// Global configuration constants and [`AnnIndexConfig`].
pub mod config;
/// Embedding matrices and `.npy` / fvecs / ID-list readers.
pub mod embeddings;
/// Error taxonomy shared by every module.
pub mod error;
/// HNSW approximate nearest neighbor graph: structure, search, insertion, and distance metrics.
pub mod hnsw;
/// The index controller: build, query, save, load.
pub mod index;
/// Bidirectional map between graph handles and external profile IDs.
pub mod mapping;
/// Build metadata persisted alongside the graph.
pub mod metadata;
/// Artifact persistence: graph binary and JSON sidecar.
pub mod storage;

pub use config::AnnIndexConfig;
pub use embeddings::EmbeddingMatrix;
pub use error::{AnnError, Result};
pub use hnsw::Space;
pub use index::{AnnIndex, IndexSnapshot, Neighbor};
pub use mapping::IdMap;
pub use metadata::IndexMetadata;
