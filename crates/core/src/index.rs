//! The index controller: build, query, save, load.
//!
//! An [`AnnIndex`] owns at most one immutable [`IndexSnapshot`] (graph +
//! identifier map + metadata). `build()` and `load()` construct a complete new
//! snapshot off to the side and swap it in under a brief write lock, so readers
//! never observe a half-built index. Queries clone the current `Arc` and run
//! without holding any lock.

use crate::config::{AnnIndexConfig, QUERY_OVERFETCH_MARGIN};
use crate::embeddings::EmbeddingMatrix;
use crate::error::{AnnError, Result};
use crate::hnsw::{HnswConfig, HnswIndex, Space};
use crate::mapping::IdMap;
use crate::metadata::IndexMetadata;
use crate::storage;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cosine builds warn when any row's norm is further than this from 1.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// One ranked result: an external ID and its similarity (higher is better).
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
}

/// A fully built index. Never mutated after construction.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub graph: HnswIndex,
    pub ids: IdMap,
    pub metadata: IndexMetadata,
}

impl IndexSnapshot {
    /// Translate raw `(distance, handle)` pairs, nearest first, into scored
    /// external IDs, skipping `exclude` and stopping after `k` survivors.
    fn translate(
        &self,
        raw: &[(f32, u32)],
        k: usize,
        exclude: Option<&HashSet<&str>>,
    ) -> Vec<Neighbor> {
        let space = self.metadata.space;
        let mut out = Vec::with_capacity(k.min(raw.len()));
        for &(distance, handle) in raw {
            if out.len() >= k {
                break;
            }
            let Some(id) = self.ids.external(handle) else {
                continue;
            };
            if exclude.is_some_and(|ex| ex.contains(id)) {
                continue;
            }
            out.push(Neighbor {
                id: id.to_string(),
                score: space.similarity(distance),
            });
        }
        out
    }
}

/// HNSW-backed nearest-neighbor index over externally identified embeddings.
///
/// `build()`/`load()` are serialized by an internal build lock; any number of
/// `query()`/`query_batch()` calls may run concurrently with each other and
/// with a rebuild (they keep using the snapshot they started on).
#[derive(Debug)]
pub struct AnnIndex {
    config: AnnIndexConfig,
    dim: AtomicUsize,
    state: RwLock<Option<Arc<IndexSnapshot>>>,
    build_lock: Mutex<()>,
}

impl AnnIndex {
    /// Creates an empty controller for `dim`-dimensional embeddings.
    pub fn new(config: AnnIndexConfig, dim: usize) -> Result<Self> {
        config.validate()?;
        check_dimension(dim)?;
        Ok(Self {
            config,
            dim: AtomicUsize::new(dim),
            state: RwLock::new(None),
            build_lock: Mutex::new(()),
        })
    }

    /// Creates a controller and loads the artifact at `dir` into it.
    pub fn open(config: AnnIndexConfig, dir: impl AsRef<Path>) -> Result<Self> {
        config.validate()?;
        let index = Self {
            config,
            dim: AtomicUsize::new(0),
            state: RwLock::new(None),
            build_lock: Mutex::new(()),
        };
        index.load(dir)?;
        Ok(index)
    }

    pub fn config(&self) -> &AnnIndexConfig {
        &self.config
    }

    /// Embedding dimension: configured at construction, replaced by `load()`.
    pub fn dim(&self) -> usize {
        self.dim.load(Ordering::Acquire)
    }

    /// Similarity space of the live index, or of the configuration before one exists.
    pub fn space(&self) -> Space {
        self.snapshot()
            .map_or(self.config.space, |s| s.metadata.space)
    }

    /// True once a build or load has succeeded.
    pub fn is_ready(&self) -> bool {
        self.state.read().is_some()
    }

    /// Number of indexed elements (0 before build/load).
    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |s| s.graph.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata of the live index.
    pub fn metadata(&self) -> Option<IndexMetadata> {
        self.snapshot().map(|s| s.metadata.clone())
    }

    /// Whether `external_id` is indexed.
    pub fn contains(&self, external_id: &str) -> bool {
        self.snapshot()
            .is_some_and(|s| s.ids.handle(external_id).is_some())
    }

    /// The stored embedding of an indexed external ID.
    pub fn embedding_of(&self, external_id: &str) -> Option<Vec<f32>> {
        let snap = self.snapshot()?;
        let handle = snap.ids.handle(external_id)?;
        Some(snap.graph.vector(handle).to_vec())
    }

    /// The live snapshot, if any. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.state.read().clone()
    }

    fn ready_snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        self.snapshot().ok_or(AnnError::NotBuilt)
    }

    /// Build a fresh index from `embeddings` (row `i` belongs to `ids[i]`),
    /// replacing whatever was live before.
    ///
    /// Capacity resolves to `max(N, max_elements)`. Handles follow input order.
    /// On error the previous index stays live and untouched.
    pub fn build<S: AsRef<str>>(&self, embeddings: &EmbeddingMatrix, ids: &[S]) -> Result<()> {
        let _guard = self.build_lock.lock();
        let started = Instant::now();

        let n = embeddings.len();
        if n != ids.len() {
            return Err(AnnError::InputLengthMismatch {
                embeddings: n,
                ids: ids.len(),
            });
        }
        if n == 0 {
            return Err(AnnError::EmptyInput);
        }
        let dim = self.dim();
        if embeddings.dim() != dim {
            return Err(AnnError::DimensionMismatch {
                expected: dim,
                actual: embeddings.dim(),
            });
        }
        if let Some((row, col)) = embeddings.first_non_finite() {
            return Err(AnnError::InvalidInput(format!(
                "embedding row {row} has a non-finite value at column {col}"
            )));
        }
        if self.config.space == Space::Cosine {
            let deviation = embeddings.max_norm_deviation();
            if deviation > UNIT_NORM_TOLERANCE {
                tracing::warn!(
                    "Embeddings are not unit-normalized (max |norm - 1| = {:.4}); \
                     cosine scores assume normalized input",
                    deviation
                );
            }
        }

        let id_map = IdMap::from_ids(ids)?;

        let capacity = n.max(self.config.max_elements);
        let mut graph = HnswIndex::with_capacity(
            dim,
            capacity,
            HnswConfig::from(&self.config),
            self.config.seed,
        );
        graph.reserve(n);
        for row in embeddings.rows() {
            graph.insert(row)?;
        }
        graph.set_ef(self.config.ef_search);

        let metadata = IndexMetadata {
            n_elements: n,
            dim,
            space: self.config.space,
            built_at: Utc::now(),
            ef_construction: self.config.ef_construction,
            m: self.config.m,
        };

        *self.state.write() = Some(Arc::new(IndexSnapshot {
            graph,
            ids: id_map,
            metadata,
        }));

        tracing::info!(
            "Built ANN index with {} elements (dim={}, space={}, capacity={}) in {:.2?}",
            n,
            dim,
            self.config.space,
            capacity,
            started.elapsed()
        );
        Ok(())
    }

    /// The `k` most similar indexed profiles to `embedding`, best first,
    /// never including any ID in `exclude_ids`.
    ///
    /// The first round asks the graph for
    /// `min(k + |exclude| + QUERY_OVERFETCH_MARGIN, N)` candidates. When
    /// exclusions leave fewer than `k` survivors, the request doubles until `k`
    /// survive or all `N` elements have been requested.
    pub fn query(
        &self,
        embedding: &[f32],
        k: usize,
        exclude_ids: Option<&[String]>,
    ) -> Result<Vec<Neighbor>> {
        let snap = self.ready_snapshot()?;
        check_query_vector(&snap, embedding)?;
        let n = snap.graph.len();
        let k = k.min(n);
        if k == 0 {
            return Ok(Vec::new());
        }

        let exclude: HashSet<&str> = exclude_ids
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect();
        let mut request = k
            .saturating_add(exclude.len())
            .saturating_add(QUERY_OVERFETCH_MARGIN)
            .min(n);

        loop {
            let raw = snap.graph.search(embedding, request);
            let results = snap.translate(&raw, k, Some(&exclude));
            if results.len() >= k || request >= n {
                return Ok(results);
            }
            tracing::debug!(
                "Exclusions left {}/{} results from {} candidates; widening search",
                results.len(),
                k,
                request
            );
            request = request.saturating_mul(2).min(n);
        }
    }

    /// Nearest neighbors for every row of `embeddings`, without exclusions.
    ///
    /// Returns exactly `min(k, N)` results per row; the outer order matches the
    /// input rows. Rows are searched in parallel.
    pub fn query_batch(&self, embeddings: &EmbeddingMatrix, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        let snap = self.ready_snapshot()?;
        let dim = snap.graph.dimension();
        if embeddings.dim() != dim {
            return Err(AnnError::DimensionMismatch {
                expected: dim,
                actual: embeddings.dim(),
            });
        }
        if let Some((row, col)) = embeddings.first_non_finite() {
            return Err(AnnError::InvalidInput(format!(
                "query row {row} has a non-finite value at column {col}"
            )));
        }
        let k = k.min(snap.graph.len());

        let rows: Vec<&[f32]> = embeddings.rows().collect();
        Ok(rows
            .par_iter()
            .map(|row| {
                let raw = snap.graph.search(row, k);
                snap.translate(&raw, k, None)
            })
            .collect())
    }

    /// Write `index.bin` and `mappings.json` into `dir`, creating it if absent.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let snap = self.ready_snapshot()?;
        storage::save_artifact(dir.as_ref(), &snap.graph, &snap.ids, &snap.metadata)
    }

    /// Replace the live index with the artifact stored in `dir`.
    ///
    /// Dimension and space come from the sidecar; the configured `ef_search`
    /// is re-applied. On error the previous index stays live.
    pub fn load(&self, dir: impl AsRef<Path>) -> Result<()> {
        let _guard = self.build_lock.lock();
        let storage::Artifact {
            mut graph,
            ids,
            metadata,
        } = storage::load_artifact(dir.as_ref())?;
        graph.set_ef(self.config.ef_search);
        if metadata.space != self.config.space {
            tracing::info!(
                "Loaded index uses space '{}' (configured '{}'); using the stored space",
                metadata.space,
                self.config.space
            );
        }

        self.dim.store(metadata.dim, Ordering::Release);
        *self.state.write() = Some(Arc::new(IndexSnapshot {
            graph,
            ids,
            metadata,
        }));
        Ok(())
    }
}

fn check_dimension(dim: usize) -> Result<()> {
    if dim == 0 || dim > crate::config::MAX_DIMENSION {
        return Err(AnnError::InvalidConfig(format!(
            "dimension must be in 1..={}, got {}",
            crate::config::MAX_DIMENSION,
            dim
        )));
    }
    Ok(())
}

fn check_query_vector(snap: &IndexSnapshot, embedding: &[f32]) -> Result<()> {
    let dim = snap.graph.dimension();
    if embedding.len() != dim {
        return Err(AnnError::DimensionMismatch {
            expected: dim,
            actual: embedding.len(),
        });
    }
    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(AnnError::InvalidInput(
            "query embedding has a non-finite value".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config() -> AnnIndexConfig {
        AnnIndexConfig {
            max_elements: 64,
            seed: Some(17),
            ..AnnIndexConfig::default()
        }
    }

    fn unit(dim: usize, seed: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed as u64);
        let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    fn corpus(n: usize, dim: usize) -> (EmbeddingMatrix, Vec<String>) {
        let rows: Vec<Vec<f32>> = (0..n).map(|i| unit(dim, i)).collect();
        let ids = (0..n).map(|i| format!("user-{i}")).collect();
        (EmbeddingMatrix::from_rows(&rows).unwrap(), ids)
    }

    #[test]
    fn test_not_built_errors() {
        let index = AnnIndex::new(config(), 8).unwrap();
        assert!(!index.is_ready());
        assert!(matches!(
            index.query(&unit(8, 0), 5, None),
            Err(AnnError::NotBuilt)
        ));
        let batch = EmbeddingMatrix::from_rows(&[unit(8, 0)]).unwrap();
        assert!(matches!(index.query_batch(&batch, 5), Err(AnnError::NotBuilt)));
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(index.save(dir.path()), Err(AnnError::NotBuilt)));
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        assert!(AnnIndex::new(config(), 0).is_err());
        assert!(AnnIndex::new(config(), crate::config::MAX_DIMENSION + 1).is_err());
    }

    #[test]
    fn test_build_length_mismatch_checked_first() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, mut ids) = corpus(5, 8);
        ids.pop();
        let err = index.build(&m, &ids).unwrap_err();
        assert!(matches!(
            err,
            AnnError::InputLengthMismatch {
                embeddings: 5,
                ids: 4
            }
        ));
        assert!(!index.is_ready());
    }

    #[test]
    fn test_build_wrong_dimension() {
        let index = AnnIndex::new(config(), 16).unwrap();
        let (m, ids) = corpus(5, 8);
        assert!(matches!(
            index.build(&m, &ids),
            Err(AnnError::DimensionMismatch {
                expected: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_build_rejects_non_finite() {
        let index = AnnIndex::new(config(), 2).unwrap();
        let m = EmbeddingMatrix::from_rows(&[vec![1.0, 0.0], vec![f32::INFINITY, 0.0]]).unwrap();
        assert!(matches!(
            index.build(&m, &["a", "b"]),
            Err(AnnError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_replaces_previous_state() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(20, 8);
        index.build(&m, &ids).unwrap();
        assert_eq!(index.len(), 20);
        assert!(index.contains("user-19"));

        let (m2, _) = corpus(5, 8);
        let ids2: Vec<String> = (0..5).map(|i| format!("other-{i}")).collect();
        index.build(&m2, &ids2).unwrap();
        assert_eq!(index.len(), 5);
        assert!(!index.contains("user-19"));
        assert!(index.contains("other-4"));
        assert_eq!(index.metadata().unwrap().n_elements, 5);
    }

    #[test]
    fn test_failed_build_keeps_previous_index() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(10, 8);
        index.build(&m, &ids).unwrap();
        let dup = vec!["x".to_string(); 10];
        assert!(index.build(&m, &dup).is_err());
        assert_eq!(index.len(), 10);
        assert!(index.contains("user-3"));
    }

    #[test]
    fn test_query_self_first() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(50, 8);
        index.build(&m, &ids).unwrap();
        let results = index.query(m.row(7), 3, None).unwrap();
        assert_eq!(results[0].id, "user-7");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_query_wrong_width() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(10, 8);
        index.build(&m, &ids).unwrap();
        assert!(matches!(
            index.query(&[1.0, 0.0], 3, None),
            Err(AnnError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.query(&[f32::NAN; 8], 3, None),
            Err(AnnError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_query_k_zero_and_k_above_len() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(6, 8);
        index.build(&m, &ids).unwrap();
        assert!(index.query(m.row(0), 0, None).unwrap().is_empty());
        assert_eq!(index.query(m.row(0), 100, None).unwrap().len(), 6);
    }

    #[test]
    fn test_large_k_is_never_truncated() {
        // 30 nodes stay under the layer-0 link budget, so every node is reachable.
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(30, 8);
        index.build(&m, &ids).unwrap();

        assert_eq!(index.query(m.row(0), 25, None).unwrap().len(), 25);
        assert_eq!(index.query(m.row(0), 30, None).unwrap().len(), 30);
        assert_eq!(index.query(m.row(0), usize::MAX, None).unwrap().len(), 30);
        let exclude = vec![ids[0].clone()];
        assert_eq!(
            index
                .query(m.row(0), usize::MAX, Some(exclude.as_slice()))
                .unwrap()
                .len(),
            29
        );

        let batch = index.query_batch(&m, 28).unwrap();
        assert!(batch.iter().all(|r| r.len() == 28));
        let batch = index.query_batch(&m, usize::MAX).unwrap();
        assert!(batch.iter().all(|r| r.len() == 30));
    }

    /// Graph whose first `linked` nodes are inserted normally and whose
    /// remaining nodes sit on layer 0 with no links in or out.
    fn partly_unreachable(linked: usize, total: usize, dim: usize) -> (HnswIndex, Vec<String>) {
        let mut graph =
            HnswIndex::with_capacity(dim, total, HnswConfig::from(&config()), Some(3));
        for i in 0..linked {
            graph.insert(&unit(dim, i)).unwrap();
        }
        for i in linked..total {
            graph.vectors.extend_from_slice(&unit(dim, i));
            graph.neighbors.push(vec![Vec::new()]);
            graph.layers.push(0);
        }
        graph.validate().unwrap();
        let ids = (0..total).map(|i| format!("user-{i}")).collect();
        (graph, ids)
    }

    #[test]
    fn test_exclusion_search_widens_then_stops_at_n() {
        let (graph, ids) = partly_unreachable(20, 40, 8);
        let query = graph.vector(0).to_vec();
        let index = AnnIndex::new(config(), 8).unwrap();
        *index.state.write() = Some(Arc::new(IndexSnapshot {
            metadata: IndexMetadata {
                n_elements: 40,
                dim: 8,
                space: Space::Cosine,
                built_at: Utc::now(),
                ef_construction: 200,
                m: 16,
            },
            ids: IdMap::from_ids(&ids).unwrap(),
            graph,
        }));

        // Only the 20 linked nodes are reachable. Excluding 17 of them leaves
        // 3 survivors from a first request of 5 + 17 + 10 = 32 < 40, so the
        // search must widen to all 40 before giving up short of k.
        let exclude: Vec<String> = ids[..17].to_vec();
        let results = index.query(&query, 5, Some(exclude.as_slice())).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !exclude.contains(&r.id)));
        assert!(results
            .iter()
            .all(|r| ids[17..20].contains(&r.id)));
    }

    #[test]
    fn test_query_excluding_almost_everything() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(60, 8);
        index.build(&m, &ids).unwrap();
        let all = index.query(m.row(0), 60, None).unwrap();
        let excluded: Vec<String> = all.iter().take(55).map(|r| r.id.clone()).collect();
        let results = index.query(m.row(0), 5, Some(excluded.as_slice())).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !excluded.contains(&r.id)));
    }

    #[test]
    fn test_embedding_of() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(4, 8);
        index.build(&m, &ids).unwrap();
        assert_eq!(index.embedding_of("user-2").unwrap(), m.row(2));
        assert!(index.embedding_of("ghost").is_none());
    }

    #[test]
    fn test_capacity_resolves_to_max_of_n_and_config() {
        let index = AnnIndex::new(config(), 8).unwrap();
        let (m, ids) = corpus(100, 8);
        index.build(&m, &ids).unwrap();
        let snap = index.snapshot().unwrap();
        assert_eq!(snap.graph.capacity(), 100);

        let (m, ids) = corpus(10, 8);
        index.build(&m, &ids).unwrap();
        assert_eq!(index.snapshot().unwrap().graph.capacity(), 64);
    }
}
