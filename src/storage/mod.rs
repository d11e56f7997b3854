//! Local persistence collaborators
//!
//! A string key-value store backs the model configuration, prompt-assistant
//! configuration and generation history. Each storage publishes its current value
//! through a `watch` channel so the orchestrator, sync manager and UI can react to
//! changes without reaching for global state.

pub mod blob;
pub mod config;
pub mod history;
pub mod kv;

pub use blob::ImageBlobStore;
pub use config::{ModelConfigStorage, PromptAiConfigStorage};
pub use history::ChatHistoryStorage;
pub use kv::{JsonFileStore, MemoryStore};

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

const STORE_FILE: &str = "store.json";
const IMAGES_DIR: &str = "images";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Every local collaborator, opened over one key-value store.
#[derive(Clone)]
pub struct LocalStorage {
    pub model_configs: Arc<ModelConfigStorage>,
    pub prompt_ai: Arc<PromptAiConfigStorage>,
    pub history: Arc<ChatHistoryStorage>,
    pub blobs: Arc<ImageBlobStore>,
}

impl LocalStorage {
    /// `<data_dir>/store.json` for records, `<data_dir>/images/` for image files.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&data_dir.join(STORE_FILE))?);
        Self::with_store(kv, &data_dir.join(IMAGES_DIR))
    }

    pub fn with_store(kv: Arc<dyn KeyValueStore>, images_dir: &Path) -> Result<Self> {
        Ok(Self {
            model_configs: Arc::new(ModelConfigStorage::load(kv.clone())?),
            prompt_ai: Arc::new(PromptAiConfigStorage::load(kv.clone())?),
            history: Arc::new(ChatHistoryStorage::load(kv)?),
            blobs: Arc::new(ImageBlobStore::new(images_dir)),
        })
    }
}

/// A JSON value persisted under one key and published to subscribers.
pub(crate) struct PublishedValue<T> {
    kv: Arc<dyn KeyValueStore>,
    key: &'static str,
    current: watch::Sender<T>,
    writer: Mutex<()>,
}

impl<T> PublishedValue<T>
where
    T: Serialize + DeserializeOwned + Clone + Default + PartialEq + Send + Sync,
{
    /// Load the stored value; a malformed entry is logged and replaced by the default.
    pub(crate) fn load(kv: Arc<dyn KeyValueStore>, key: &'static str) -> Result<Self> {
        let value = match kv.get(key)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed local entry '{}': {}", key, e);
                T::default()
            }),
            None => T::default(),
        };
        let (current, _) = watch::channel(value);
        Ok(Self {
            kv,
            key,
            current,
            writer: Mutex::new(()),
        })
    }

    pub(crate) fn get(&self) -> T {
        self.current.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.current.subscribe()
    }

    /// Apply `edit` to the current value, persist the result, then publish it.
    ///
    /// Writers are serialized, so concurrent edits never overwrite each other. Nothing
    /// is published when the edit is a no-op or the write fails.
    pub(crate) fn update(&self, edit: impl FnOnce(&mut T)) -> Result<bool> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.get();
        edit(&mut next);
        if *self.current.borrow() == next {
            return Ok(false);
        }
        self.kv.put(self.key, &serde_json::to_string(&next)?)?;
        self.current.send_replace(next);
        Ok(true)
    }

    pub(crate) fn set(&self, value: T) -> Result<bool> {
        self.update(|current| *current = value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn put(&self, key: &str, _value: &str) -> Result<()> {
            Err(Error::Config(format!("disk full writing {}", key)))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_is_not_published() {
        let value: PublishedValue<Vec<String>> =
            PublishedValue::load(Arc::new(FailingStore), "names").unwrap();
        let rx = value.subscribe();

        let result = value.update(|names| names.push("ada".to_string()));

        assert!(result.is_err());
        assert!(value.get().is_empty());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_update_persists_before_publishing() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let value: PublishedValue<Vec<String>> = PublishedValue::load(kv.clone(), "names").unwrap();
        let mut rx = value.subscribe();

        assert!(value.update(|names| names.push("ada".to_string())).unwrap());
        assert!(!value.update(|_| {}).unwrap());

        assert_eq!(*rx.borrow_and_update(), vec!["ada".to_string()]);
        assert_eq!(kv.get("names").unwrap().as_deref(), Some(r#"["ada"]"#));
    }
}
