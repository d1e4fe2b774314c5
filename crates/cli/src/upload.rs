//! Publishing a saved artifact directory to an artifact store.
//!
//! Objects are keyed `indices/<UTC %Y%m%d_%H%M%S>/<file>` inside a bucket. The
//! only backend is [`DirectoryStore`], which copies files into a local or
//! mounted directory laid out as `<root>/<bucket>/<key>`. There is no network
//! transport and no credential handling; a configured root is all it needs.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming the object store root.
pub const STORE_ROOT_ENV: &str = "ANN_ARTIFACT_STORE";

/// Environment variable naming the bucket.
pub const BUCKET_ENV: &str = "ANN_ARTIFACT_BUCKET";

pub const DEFAULT_BUCKET: &str = "ml-artifacts";

/// Key prefix under which every build's artifacts land.
pub const KEY_PREFIX: &str = "indices";

/// Destination for artifact files.
pub trait ArtifactStore {
    /// Copy `local` to `key`, returning a printable location of the stored object.
    fn put(&self, key: &str, local: &Path) -> io::Result<String>;
}

/// Object store rooted at a directory: bucket `b`, key `k` lives at `root/b/k`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    bucket: String,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    /// The store configured by `root` (or `ANN_ARTIFACT_STORE`) and
    /// `ANN_ARTIFACT_BUCKET`, or `None` when no root is configured.
    pub fn from_env(root: Option<PathBuf>) -> Option<Self> {
        let root = root.or_else(|| {
            std::env::var_os(STORE_ROOT_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })?;
        let bucket = std::env::var(BUCKET_ENV)
            .ok()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        Some(Self::new(root, bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl ArtifactStore for DirectoryStore {
    fn put(&self, key: &str, local: &Path) -> io::Result<String> {
        let dest = self.root.join(&self.bucket).join(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest)?;
        Ok(format!("{}/{}", self.bucket, key))
    }
}

/// `indices/<%Y%m%d_%H%M%S>` for the given instant.
pub fn key_prefix_at(at: DateTime<Utc>) -> String {
    format!("{KEY_PREFIX}/{}", at.format("%Y%m%d_%H%M%S"))
}

/// Upload every regular file directly inside `dir` under `prefix`.
/// Returns the stored locations in file-name order.
pub fn upload_dir(store: &dyn ArtifactStore, dir: &Path, prefix: &str) -> io::Result<Vec<String>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut stored = Vec::with_capacity(files.len());
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let location = store.put(&format!("{prefix}/{name}"), &path)?;
        tracing::info!("Uploaded {} to {}", path.display(), location);
        stored.push(location);
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_key_prefix_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(key_prefix_at(at), "indices/20240307_090501");
    }

    #[test]
    fn test_upload_dir_copies_files() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("index.bin"), b"graph").unwrap();
        fs::write(src.path().join("mappings.json"), b"{}").unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();

        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path(), "ml-artifacts");
        let stored = upload_dir(&store, src.path(), "indices/20240101_000000").unwrap();

        assert_eq!(
            stored,
            vec![
                "ml-artifacts/indices/20240101_000000/index.bin",
                "ml-artifacts/indices/20240101_000000/mappings.json",
            ]
        );
        let copied = root
            .path()
            .join("ml-artifacts/indices/20240101_000000/index.bin");
        assert_eq!(fs::read(copied).unwrap(), b"graph");
        assert!(!root
            .path()
            .join("ml-artifacts/indices/20240101_000000/nested")
            .exists());
    }

    #[test]
    fn test_explicit_root_wins() {
        let store = DirectoryStore::from_env(Some(PathBuf::from("/mnt/store"))).unwrap();
        assert_eq!(store.root, PathBuf::from("/mnt/store"));
    }

    #[test]
    fn test_upload_missing_dir_fails() {
        let root = TempDir::new().unwrap();
        let store = DirectoryStore::new(root.path(), "b");
        assert!(upload_dir(&store, &root.path().join("absent"), "indices/x").is_err());
    }
}
