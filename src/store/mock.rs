use super::ObjectStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory object store with call counters and per-key failure injection.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    failing_puts: Arc<Mutex<HashSet<String>>>,
    failing_gets: Arc<Mutex<HashSet<String>>>,
    put_count: Arc<Mutex<usize>>,
    get_count: Arc<Mutex<usize>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, content: Vec<u8>) -> Self {
        self.objects.lock().unwrap().insert(key.to_string(), content);
        self
    }

    pub fn with_json(self, key: &str, value: &serde_json::Value) -> Self {
        let content = serde_json::to_vec(value).unwrap_or_default();
        self.with_object(key, content)
    }

    pub fn fail_puts_for(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_gets_for(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_puts.lock().unwrap().clear();
        self.failing_gets.lock().unwrap().clear();
    }

    pub fn get_put_count(&self) -> usize {
        *self.put_count.lock().unwrap()
    }

    pub fn get_get_count(&self) -> usize {
        *self.get_count.lock().unwrap()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_json(&self, key: &str) -> Option<serde_json::Value> {
        self.object(key)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<()> {
        *self.put_count.lock().unwrap() += 1;
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(Error::ObjectStore(format!("Injected upload failure for {}", key)));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        *self.get_count.lock().unwrap() += 1;
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(Error::ObjectStore(format!("Injected read failure for {}", key)));
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
