//! Filesystem-backed `Storage` adapter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use headway_core::{Error, Result, StoredFile};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.contains("..") || key.starts_with('/') {
            return Err(Error::BadRequest(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl headway_core::Storage for FsStorage {
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<StoredFile> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        file.write_all(bytes)
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(StoredFile {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .map_err(|_| Error::CollectionNotFound(format!("storage key not found: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(e.to_string())),
        }
    }
}

pub fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headway_core::Storage;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = std::env::temp_dir().join(format!("headway-storage-test-{}", uuid::Uuid::new_v4()));
        let storage = FsStorage::new(&dir);
        storage.put("a/b.png", "image/png", b"hello").await.unwrap();
        let bytes = storage.get("a/b.png").await.unwrap();
        assert_eq!(bytes, b"hello");
        storage.delete("a/b.png").await.unwrap();
        assert!(storage.get("a/b.png").await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let storage = FsStorage::new("./storage-test-root");
        assert!(storage.put("../escape.png", "image/png", b"x").await.is_err());
    }
}
