//! File-backed store for decoded images, one file per history id.

use crate::ai::mime::{detect_image_mime, extension_for_mime};
use crate::models::HistoryItem;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const KNOWN_EXTENSIONS: [&str; 4] = ["png", "jpg", "webp", "gif"];

pub struct ImageBlobStore {
    dir: PathBuf,
}

impl ImageBlobStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn save_sync(dir: PathBuf, id: String, bytes: Vec<u8>) -> Result<PathBuf> {
        fs::create_dir_all(&dir)?;
        let extension = extension_for_mime(detect_image_mime(&bytes));
        let path = dir.join(format!("{}.{}", id, extension));
        fs::write(&path, &bytes)?;
        Ok(path)
    }

    fn find_sync(dir: &Path, id: &str) -> Option<PathBuf> {
        KNOWN_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", id, ext)))
            .find(|path| path.is_file())
    }

    async fn run_blocking<T, F>(task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(task)
            .await
            .map_err(|e| Error::Invariant(format!("Blob store task join error: {}", e)))?
    }

    /// Write image bytes for `id`, returning the file path.
    pub async fn save(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.dir.clone();
        let id = id.to_string();
        let bytes = bytes.to_vec();
        Self::run_blocking(move || Self::save_sync(dir, id, bytes)).await
    }

    pub async fn load(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let dir = self.dir.clone();
        let id = id.to_string();
        Self::run_blocking(move || match Self::find_sync(&dir, &id) {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        })
        .await
    }

    /// Image bytes for a history record: its local file if the URL is a path, else the blob by id.
    pub async fn load_for_item(&self, item: &HistoryItem) -> Result<Option<Vec<u8>>> {
        if let Some(path) = item
            .image_url
            .as_deref()
            .map(|url| url.strip_prefix("file://").unwrap_or(url))
            .filter(|url| url.starts_with('/'))
            .map(PathBuf::from)
        {
            let bytes = Self::run_blocking(move || {
                if path.is_file() {
                    Ok(Some(fs::read(path)?))
                } else {
                    Ok(None)
                }
            })
            .await?;
            if bytes.is_some() {
                return Ok(bytes);
            }
        }
        self.load(&item.id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let dir = self.dir.clone();
        let id = id.to_string();
        Self::run_blocking(move || {
            if let Some(path) = Self::find_sync(&dir, &id) {
                fs::remove_file(path)?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use tempfile::TempDir;

    const PNG: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    const JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

    #[tokio::test]
    async fn test_save_and_load_by_id() {
        let dir = TempDir::new().unwrap();
        let store = ImageBlobStore::new(dir.path());

        let path = store.save("42", &JPEG).await.unwrap();
        assert!(path.to_string_lossy().ends_with("42.jpg"));
        assert_eq!(store.load("42").await.unwrap(), Some(JPEG.to_vec()));
        assert_eq!(store.load("43").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_for_item_prefers_local_path() {
        let dir = TempDir::new().unwrap();
        let store = ImageBlobStore::new(dir.path());
        let external = dir.path().join("external.png");
        std::fs::write(&external, PNG).unwrap();
        store.save("7", &JPEG).await.unwrap();

        let mut item = HistoryItem {
            id: "7".to_string(),
            prompt: "p".to_string(),
            image_url: Some(external.to_string_lossy().to_string()),
            timestamp: "2024-01-01 00:00".to_string(),
            model: "m".to_string(),
            provider: Provider::Google,
        };
        assert_eq!(store.load_for_item(&item).await.unwrap(), Some(PNG.to_vec()));

        item.image_url = Some("https://remote.example/7.png".to_string());
        assert_eq!(store.load_for_item(&item).await.unwrap(), Some(JPEG.to_vec()));
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = ImageBlobStore::new(dir.path());
        store.save("1", &PNG).await.unwrap();
        store.delete("1").await.unwrap();
        assert!(store.load("1").await.unwrap().is_none());
        store.delete("1").await.unwrap();
    }
}
