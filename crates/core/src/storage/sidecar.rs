//! The `mappings.json` sidecar: identifier map plus build metadata.
//!
//! Layout:
//! `{"id_to_user": {"<handle>": "<external_id>", ...}, "metadata": {...}}`.

use crate::error::{AnnError, Result};
use crate::mapping::IdMap;
use crate::metadata::IndexMetadata;
use crate::storage::persistence::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Serialize)]
struct SidecarOut<'a> {
    id_to_user: &'a IdMap,
    metadata: &'a IndexMetadata,
}

#[derive(Deserialize)]
struct SidecarIn {
    id_to_user: HashMap<String, String>,
    metadata: IndexMetadata,
}

/// Write the sidecar atomically. Returns the number of bytes written.
pub fn save_sidecar(ids: &IdMap, metadata: &IndexMetadata, path: &Path) -> Result<usize> {
    let bytes = serde_json::to_vec_pretty(&SidecarOut {
        id_to_user: ids,
        metadata,
    })
    .map_err(|e| io::Error::other(e.to_string()))?;
    write_atomic(path, &bytes)?;
    Ok(bytes.len())
}

/// Read and validate the sidecar. Missing, unparsable, or inconsistent files
/// are [`AnnError::MalformedArtifact`].
pub fn load_sidecar(path: &Path) -> Result<(IdMap, IndexMetadata)> {
    let raw = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            AnnError::MalformedArtifact(format!("sidecar {} not found", path.display()))
        }
        _ => AnnError::Io(e),
    })?;
    let parsed: SidecarIn = serde_json::from_slice(&raw)
        .map_err(|e| AnnError::MalformedArtifact(format!("sidecar {}: {e}", path.display())))?;
    let ids = IdMap::from_sidecar(parsed.id_to_user, parsed.metadata.n_elements)?;
    Ok((ids, parsed.metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::Space;
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta(n: usize) -> IndexMetadata {
        IndexMetadata {
            n_elements: n,
            dim: 8,
            space: Space::Euclidean,
            built_at: Utc::now(),
            ef_construction: 100,
            m: 12,
        }
    }

    #[test]
    fn test_sidecar_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        let ids = IdMap::from_ids(&["p1", "p2", "p3"]).unwrap();
        let m = meta(3);
        save_sidecar(&ids, &m, &path).unwrap();

        let (ids2, m2) = load_sidecar(&path).unwrap();
        assert_eq!(ids2, ids);
        assert_eq!(m2.n_elements, 3);
        assert_eq!(m2.dim, 8);
        assert_eq!(m2.space, Space::Euclidean);
        assert_eq!(m2.m, 12);
        assert_eq!(m2.built_at.timestamp_micros(), m.built_at.timestamp_micros());
    }

    #[test]
    fn test_sidecar_json_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        save_sidecar(&IdMap::from_ids(&["p1"]).unwrap(), &meta(1), &path).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["id_to_user"]["0"], "p1");
        assert_eq!(v["metadata"]["space"], "l2");
        assert!(v["metadata"]["built_at"].is_string());
    }

    #[test]
    fn test_missing_sidecar() {
        let dir = TempDir::new().unwrap();
        let err = load_sidecar(&dir.path().join("mappings.json")).unwrap_err();
        assert!(matches!(err, AnnError::MalformedArtifact(_)));
    }

    #[test]
    fn test_sidecar_without_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        fs::write(&path, r#"{"id_to_user": {"0": "p1"}}"#).unwrap();
        assert!(matches!(
            load_sidecar(&path),
            Err(AnnError::MalformedArtifact(_))
        ));
    }

    #[test]
    fn test_sidecar_count_disagrees_with_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mappings.json");
        save_sidecar(&IdMap::from_ids(&["p1", "p2"]).unwrap(), &meta(3), &path).unwrap();
        assert!(matches!(
            load_sidecar(&path),
            Err(AnnError::MalformedArtifact(_))
        ));
    }
}
