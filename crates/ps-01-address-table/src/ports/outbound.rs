//! # Outbound Ports (Driven Ports)
//!
//! Storage the address-table subsystem depends on.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shared_types::SnapshotError;

/// Persistent storage for stashed files and encoded snapshots.
///
/// Stash entries are keyed by a file path plus the determinant hash of the
/// inputs that produced the file.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Copy the file at `path` into the stash under `(path, determinant)`.
    async fn stash(&self, path: &str, determinant: u64) -> Result<(), SnapshotError>;

    /// Copy the stashed file back to `path`. False when nothing matches.
    async fn restore(&self, path: &str, determinant: u64) -> Result<bool, SnapshotError>;

    /// Persist an encoded snapshot under `path`.
    async fn save(&self, path: &str, image: &[u8]) -> Result<(), SnapshotError>;

    /// Read an encoded snapshot from `path`.
    async fn load(&self, path: &str) -> Result<Vec<u8>, SnapshotError>;
}

/// Stash key: hex SHA-256 of the path bytes followed by the determinant.
pub fn stash_key(path: &str, determinant: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(determinant.to_le_bytes());
    hex::encode(hasher.finalize())
}
