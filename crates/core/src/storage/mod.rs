//! Storage layer: the persisted artifact directory.
//!
//! An artifact is a directory holding `index.bin` (the graph, bincode + CRC32)
//! and `mappings.json` (identifier map + build metadata). Both files are
//! written with atomic temp-file + rename.

/// Graph binary encode/decode and atomic writes.
pub mod persistence;
/// `mappings.json` sidecar.
pub mod sidecar;

use crate::config::{INDEX_FILE, MAPPINGS_FILE};
use crate::error::{AnnError, Result};
use crate::hnsw::HnswIndex;
use crate::mapping::IdMap;
use crate::metadata::IndexMetadata;
use std::fs;
use std::path::Path;

pub use persistence::{decode_graph, encode_graph, load_graph, save_graph};
pub use sidecar::{load_sidecar, save_sidecar};

/// Everything one saved artifact directory holds.
#[derive(Debug)]
pub struct Artifact {
    pub graph: HnswIndex,
    pub ids: IdMap,
    pub metadata: IndexMetadata,
}

/// Write the graph binary and sidecar into `dir`, creating it if absent.
pub fn save_artifact(
    dir: &Path,
    graph: &HnswIndex,
    ids: &IdMap,
    metadata: &IndexMetadata,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let graph_bytes = save_graph(graph, &dir.join(INDEX_FILE))?;
    let sidecar_bytes = save_sidecar(ids, metadata, &dir.join(MAPPINGS_FILE))?;

    tracing::info!(
        "Saved index to {} ({} elements, {} graph bytes, {} sidecar bytes)",
        dir.display(),
        metadata.n_elements,
        graph_bytes,
        sidecar_bytes
    );
    Ok(())
}

/// Read an artifact directory: sidecar first, then the graph, then check the
/// two agree on dimension, space, and element count.
pub fn load_artifact(dir: &Path) -> Result<Artifact> {
    let (ids, metadata) = load_sidecar(&dir.join(MAPPINGS_FILE))?;
    let graph = load_graph(&dir.join(INDEX_FILE))?;

    if graph.dimension() != metadata.dim {
        return Err(AnnError::DimensionMismatch {
            expected: metadata.dim,
            actual: graph.dimension(),
        });
    }
    if graph.space() != metadata.space {
        return Err(AnnError::SpaceMismatch {
            sidecar: metadata.space.to_string(),
            graph: graph.space().to_string(),
        });
    }
    if graph.len() != metadata.n_elements {
        return Err(AnnError::MalformedArtifact(format!(
            "graph holds {} elements but sidecar records {}",
            graph.len(),
            metadata.n_elements
        )));
    }

    tracing::info!(
        "Loaded index from {} with {} elements (dim={}, space={})",
        dir.display(),
        ids.len(),
        metadata.dim,
        metadata.space
    );
    Ok(Artifact {
        graph,
        ids,
        metadata,
    })
}
