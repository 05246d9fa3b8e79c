//! Snapshot Store Adapters
//!
//! `FileSnapshotStore` keeps stash entries and snapshots on disk;
//! `InMemorySnapshotStore` keeps everything in maps for tests and
//! single-process clusters.

use crate::ports::outbound::{stash_key, SnapshotStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::SnapshotError;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

fn storage(error: std::io::Error) -> SnapshotError {
    SnapshotError::Storage(error.to_string())
}

// =============================================================================
// FILE STORE
// =============================================================================

/// Disk-backed store.
///
/// Stash entries live in `stash_dir/<stash key>`; snapshots live under
/// `snapshot_dir` at their relative path.
pub struct FileSnapshotStore {
    stash_dir: PathBuf,
    snapshot_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Store rooted at the given directories. They are created on demand.
    pub fn new(stash_dir: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            stash_dir: stash_dir.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// Stash directory.
    pub fn stash_dir(&self) -> &Path {
        &self.stash_dir
    }

    fn snapshot_path(&self, path: &str) -> Result<PathBuf, SnapshotError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(SnapshotError::Storage(format!(
                "snapshot path '{path}' must be relative and stay inside the snapshot directory"
            )));
        }
        Ok(self.snapshot_dir.join(relative))
    }

    async fn create_parent(path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn stash(&self, path: &str, determinant: u64) -> Result<(), SnapshotError> {
        tokio::fs::create_dir_all(&self.stash_dir)
            .await
            .map_err(storage)?;
        let target = self.stash_dir.join(stash_key(path, determinant));
        tokio::fs::copy(path, &target).await.map_err(storage)?;
        info!(path, determinant, "[ps-01] file stashed");
        Ok(())
    }

    async fn restore(&self, path: &str, determinant: u64) -> Result<bool, SnapshotError> {
        let source = self.stash_dir.join(stash_key(path, determinant));
        if !tokio::fs::try_exists(&source).await.map_err(storage)? {
            debug!(path, determinant, "[ps-01] nothing stashed");
            return Ok(false);
        }
        Self::create_parent(Path::new(path)).await?;
        tokio::fs::copy(&source, path).await.map_err(storage)?;
        info!(path, determinant, "[ps-01] file restored");
        Ok(true)
    }

    async fn save(&self, path: &str, image: &[u8]) -> Result<(), SnapshotError> {
        let target = self.snapshot_path(path)?;
        Self::create_parent(&target).await?;
        tokio::fs::write(&target, image).await.map_err(storage)?;
        info!(path, bytes = image.len(), "[ps-01] snapshot saved");
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>, SnapshotError> {
        let source = self.snapshot_path(path)?;
        tokio::fs::read(&source).await.map_err(storage)
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Map-backed store. "Files" are entries set with [`put_file`].
///
/// [`put_file`]: InMemorySnapshotStore::put_file
#[derive(Default)]
pub struct InMemorySnapshotStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    stash: RwLock<HashMap<String, Vec<u8>>>,
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file.
    pub fn put_file(&self, path: &str, contents: Vec<u8>) {
        self.files.write().insert(path.to_string(), contents);
    }

    /// Contents of a file.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Delete a file.
    pub fn remove_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.write().remove(path)
    }

    /// Stash entry count.
    pub fn stash_len(&self) -> usize {
        self.stash.read().len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn stash(&self, path: &str, determinant: u64) -> Result<(), SnapshotError> {
        let contents = self
            .file(path)
            .ok_or_else(|| SnapshotError::Storage(format!("no file at '{path}'")))?;
        self.stash
            .write()
            .insert(stash_key(path, determinant), contents);
        debug!(path, determinant, "[ps-01] file stashed in memory");
        Ok(())
    }

    async fn restore(&self, path: &str, determinant: u64) -> Result<bool, SnapshotError> {
        let stashed = self.stash.read().get(&stash_key(path, determinant)).cloned();
        match stashed {
            Some(contents) => {
                self.put_file(path, contents);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save(&self, path: &str, image: &[u8]) -> Result<(), SnapshotError> {
        self.snapshots
            .write()
            .insert(path.to_string(), image.to_vec());
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>, SnapshotError> {
        self.snapshots
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| SnapshotError::Storage(format!("no snapshot at '{path}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_stash_restore() {
        let store = InMemorySnapshotStore::new();
        store.put_file("out/a.bin", vec![1, 2, 3]);
        store.stash("out/a.bin", 11).await.unwrap();
        store.remove_file("out/a.bin");

        assert!(!store.restore("out/a.bin", 12).await.unwrap());
        assert!(store.restore("out/a.bin", 11).await.unwrap());
        assert_eq!(store.file("out/a.bin"), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_stash_missing_file() {
        let store = InMemorySnapshotStore::new();
        assert!(store.stash("missing", 1).await.is_err());
        assert_eq!(store.stash_len(), 0);
    }

    #[tokio::test]
    async fn test_file_stash_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("stash"), dir.path().join("snaps"));

        let file = dir.path().join("artifact.bin");
        tokio::fs::write(&file, b"compiled").await.unwrap();
        let file_str = file.to_str().unwrap();

        store.stash(file_str, 42).await.unwrap();
        tokio::fs::remove_file(&file).await.unwrap();

        assert!(!store.restore(file_str, 43).await.unwrap());
        assert!(store.restore(file_str, 42).await.unwrap());
        assert_eq!(tokio::fs::read(&file).await.unwrap(), b"compiled");
    }

    #[tokio::test]
    async fn test_file_snapshot_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("stash"), dir.path().join("snaps"));

        store.save("owners/0.1.2.snap", &[5, 6, 7]).await.unwrap();
        assert_eq!(store.load("owners/0.1.2.snap").await.unwrap(), vec![5, 6, 7]);
        assert!(store.load("owners/none.snap").await.is_err());
    }

    #[tokio::test]
    async fn test_file_snapshot_path_cannot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("stash"), dir.path().join("snaps"));
        assert!(store.save("../outside.snap", &[1]).await.is_err());
        assert!(store.save("/abs.snap", &[1]).await.is_err());
        assert!(store.load("").await.is_err());
    }
}
