use super::{KeyValueStore, PublishedValue};
use crate::models::HistoryItem;
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;

const HISTORY_KEY: &str = "chat_history";

/// Generation history, newest first.
pub struct ChatHistoryStorage {
    value: PublishedValue<Vec<HistoryItem>>,
}

impl ChatHistoryStorage {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        Ok(Self {
            value: PublishedValue::load(kv, HISTORY_KEY)?,
        })
    }

    pub fn items(&self) -> Vec<HistoryItem> {
        self.value.get()
    }

    pub fn find(&self, id: &str) -> Option<HistoryItem> {
        self.value.get().into_iter().find(|item| item.id == id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<HistoryItem>> {
        self.value.subscribe()
    }

    /// Apply an edit to the whole list in one step. Returns whether anything changed.
    pub fn update(&self, edit: impl FnOnce(&mut Vec<HistoryItem>)) -> Result<bool> {
        self.value.update(edit)
    }

    /// Insert at the front, replacing any record with the same id.
    pub fn add(&self, item: HistoryItem) -> Result<()> {
        self.update(|items| {
            items.retain(|existing| existing.id != item.id);
            items.insert(0, item);
        })?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.update(|items| items.retain(|item| item.id != id))
    }

    pub fn set_image_url(&self, id: &str, image_url: String) -> Result<bool> {
        self.update(|items| {
            if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                item.image_url = Some(image_url);
            }
        })
    }
}
