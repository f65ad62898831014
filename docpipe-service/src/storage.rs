//! Blob storage for uploaded files.
//!
//! Objects are addressed by a relative, `/`-separated path such as
//! `documents/scan.png`.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::StorageError;

/// Get/put-by-path object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;
}

/// Deterministic blob key for an uploaded file
pub fn upload_path(filename: &str) -> String {
    format!("documents/{}", sanitize_filename(filename))
}

/// Reduce a client-supplied filename to a single safe path segment
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let sanitized: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        sanitized
    }
}

/// Blob store backed by a directory on the local filesystem
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let is_plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !is_plain {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.resolve(path)?;

        tokio::fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    path: path.to_string(),
                }
            } else {
                StorageError::Io {
                    path: path.to_string(),
                    source: e,
                }
            }
        })
    }

    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        let io_err = |source| StorageError::Io {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        // Write beside the target and rename so readers never see a partial file
        let staging = full_path.with_extension(format!("{}.partial", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, data).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&staging, &full_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_err(e));
        }

        debug!(path = %path, size = data.len(), content_type = %content_type, "Stored blob");
        Ok(())
    }
}

/// In-memory blob store for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: std::sync::Mutex<std::collections::HashMap<String, (Vec<u8>, String)>>,
}

#[cfg(test)]
impl MemoryBlobStore {
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|(_, content_type)| content_type.clone())
    }
}

#[cfg(test)]
#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })
    }

    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().insert(
            path.to_string(),
            (data.to_vec(), content_type.to_string()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upload_path_strips_directories() {
        assert_eq!(upload_path("scan.png"), "documents/scan.png");
        assert_eq!(upload_path("../../etc/passwd"), "documents/passwd");
        assert_eq!(upload_path("C:\\Users\\me\\report.pdf"), "documents/report.pdf");
        assert_eq!(upload_path("a:b?.png"), "documents/a_b_.png");
        assert_eq!(upload_path(".."), "documents/document");
        assert_eq!(upload_path(""), "documents/document");
    }

    #[tokio::test]
    async fn test_fs_put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("documents/scan.png", b"png-bytes", "image/png")
            .await
            .unwrap();
        assert_eq!(store.get("documents/scan.png").await.unwrap(), b"png-bytes");
        assert!(dir.path().join("documents/scan.png").exists());

        // Overwrite in place
        store
            .put("documents/scan.png", b"newer", "image/png")
            .await
            .unwrap();
        assert_eq!(store.get("documents/scan.png").await.unwrap(), b"newer");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("documents"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_fs_missing_and_invalid_paths() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert!(matches!(
            store.get("documents/none.png").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.get("../outside").await,
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.put("/abs/path", b"x", "image/png").await,
            Err(StorageError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.put("", b"x", "image/png").await,
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
