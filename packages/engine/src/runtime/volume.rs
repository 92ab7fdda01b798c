// packages/engine/src/runtime/volume.rs
//! Per-run volume directories on the shared filesystem
//!
//! Each run and each standby container owns `shared_root/<20-byte hex id>`,
//! which is bind-mounted into its container.

use crate::utils::errors::{EngineError, Result};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Volume directories are shared with unprivileged container users
const VOLUME_MODE: u32 = 0o777;
const FILE_MODE: u32 = 0o666;

/// Creates, fills and removes volume directories under one root
#[derive(Debug, Clone)]
pub struct VolumeStore {
    root: PathBuf,
}

impl VolumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the volume for `id`, whether or not it exists
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create the volume directory for `id`
    pub async fn create(&self, id: &str) -> Result<PathBuf> {
        let path = self.path_for(id);

        tokio::fs::create_dir(&path).await.map_err(|e| {
            EngineError::SetupFailed(format!("create volume {}: {}", path.display(), e))
        })?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(VOLUME_MODE))
            .await
            .map_err(|e| {
                EngineError::SetupFailed(format!("chmod volume {}: {}", path.display(), e))
            })?;

        debug!("Created volume {}", path.display());
        Ok(path)
    }

    /// Write one file into an existing volume
    pub async fn write_file(&self, volume: &Path, filename: &str, content: &[u8]) -> Result<()> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.starts_with('.')
        {
            return Err(EngineError::Validation(format!(
                "Invalid filename: {}",
                filename
            )));
        }

        let path = volume.join(filename);
        tokio::fs::write(&path, content).await.map_err(|e| {
            EngineError::SetupFailed(format!("write {}: {}", path.display(), e))
        })?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(FILE_MODE))
            .await
            .map_err(|e| EngineError::SetupFailed(format!("chmod {}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Recursively delete a volume; a missing directory is not an error
    pub async fn remove(&self, volume: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(volume).await {
            Ok(()) => {
                debug!("Removed volume {}", volume.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::CleanupFailed(format!(
                "remove volume {}: {}",
                volume.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_write_remove() {
        let root = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(root.path());

        let volume = store.create("abc").await.unwrap();
        assert_eq!(volume, root.path().join("abc"));

        store.write_file(&volume, "a.py", b"print(1+1)").await.unwrap();
        let written = tokio::fs::read_to_string(volume.join("a.py")).await.unwrap();
        assert_eq!(written, "print(1+1)");

        store.remove(&volume).await.unwrap();
        assert!(!volume.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let root = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(root.path());
        assert!(store.remove(&root.path().join("never-created")).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(root.path());
        store.create("dup").await.unwrap();
        assert!(store.create("dup").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let root = tempfile::tempdir().unwrap();
        let store = VolumeStore::new(root.path());
        let volume = store.create("v").await.unwrap();

        assert!(store.write_file(&volume, "../escape.py", b"x").await.is_err());
        assert!(store.write_file(&volume, "", b"x").await.is_err());
    }
}
