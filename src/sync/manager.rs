use super::history::{missing_ids, union_history};
use super::{
    history_image_key, HistoryImageBlob, HISTORY_INDEX_KEY, MODEL_CONFIGS_KEY,
    PROMPT_AI_CONFIG_KEY,
};
use crate::models::{HistoryItem, ModelConfig, PromptAiConfig};
use crate::storage::LocalStorage;
use crate::store::ObjectStore;
use crate::{Error, Result};
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    ModelConfigs,
    PromptAiConfig,
    HistoryIndex,
    HistoryImage,
    LocalStorage,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::ModelConfigs => "model configs",
            SyncStep::PromptAiConfig => "prompt assistant config",
            SyncStep::HistoryIndex => "history index",
            SyncStep::HistoryImage => "history image",
            SyncStep::LocalStorage => "local storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    pub step: SyncStep,
    pub message: String,
}

/// What one sync entry point did. Failures are collected here instead of returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub uploaded: usize,
    pub downloaded: usize,
    pub errors: Vec<SyncError>,
}

impl SyncOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn absorb(&mut self, other: SyncOutcome) {
        self.uploaded += other.uploaded;
        self.downloaded += other.downloaded;
        self.errors.extend(other.errors);
    }

    fn record(&mut self, step: SyncStep, error: impl fmt::Display) {
        warn!("Sync step '{}' degraded: {}", step, error);
        self.errors.push(SyncError {
            step,
            message: error.to_string(),
        });
    }
}

/// Notifications a UI may surface as toasts. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Finished {
        operation: &'static str,
        uploaded: usize,
        downloaded: usize,
    },
    Degraded {
        operation: &'static str,
        error: SyncError,
    },
}

pub struct SyncManager {
    store: Arc<dyn ObjectStore>,
    local: LocalStorage,
    // Serializes read-modify-write cycles on the shared history index.
    index_lock: Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncManager {
    pub fn new(store: Arc<dyn ObjectStore>, local: LocalStorage) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            local,
            index_lock: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn publish(&self, operation: &'static str, outcome: SyncOutcome) -> SyncOutcome {
        for error in &outcome.errors {
            let _ = self.events.send(SyncEvent::Degraded {
                operation,
                error: error.clone(),
            });
        }
        self.finish(operation, outcome)
    }

    /// Announce only the summary; used when sub-steps already reported their errors.
    fn finish(&self, operation: &'static str, outcome: SyncOutcome) -> SyncOutcome {
        let _ = self.events.send(SyncEvent::Finished {
            operation,
            uploaded: outcome.uploaded,
            downloaded: outcome.downloaded,
        });
        debug!(
            "Sync '{}' finished: {} up, {} down, {} errors",
            operation,
            outcome.uploaded,
            outcome.downloaded,
            outcome.errors.len()
        );
        outcome
    }

    /// Fetch and decode a remote JSON object.
    ///
    /// A missing key is `Ok(None)`. A malformed body is recorded and also `Ok(None)`;
    /// only a failed read is `Err`.
    async fn read_json<T: DeserializeOwned>(
        &self,
        key: &str,
        step: SyncStep,
        outcome: &mut SyncOutcome,
    ) -> Result<Option<T>> {
        let Some(bytes) = self.store.get(key).await? else {
            debug!("Remote {} not found", key);
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                outcome.record(step, format!("Malformed remote {}: {}", key, e));
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.store.put(key, &body, JSON_CONTENT_TYPE).await
    }

    pub async fn upload_model_configs(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let snapshot = self.local.model_configs.snapshot();
        match self.write_json(MODEL_CONFIGS_KEY, &snapshot).await {
            Ok(()) => outcome.uploaded += 1,
            Err(e) => outcome.record(SyncStep::ModelConfigs, e),
        }
        self.publish("upload model configs", outcome)
    }

    /// Replace the local model configuration with the remote copy, if there is one.
    pub async fn download_model_configs(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        match self
            .read_json::<ModelConfig>(MODEL_CONFIGS_KEY, SyncStep::ModelConfigs, &mut outcome)
            .await
        {
            Ok(Some(remote)) => match self.local.model_configs.replace(remote) {
                Ok(_) => outcome.downloaded += 1,
                Err(e) => outcome.record(SyncStep::LocalStorage, e),
            },
            Ok(None) => {}
            Err(e) => outcome.record(SyncStep::ModelConfigs, e),
        }
        self.publish("download model configs", outcome)
    }

    pub async fn upload_prompt_ai_config(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let snapshot = self.local.prompt_ai.snapshot();
        match self.write_json(PROMPT_AI_CONFIG_KEY, &snapshot).await {
            Ok(()) => outcome.uploaded += 1,
            Err(e) => outcome.record(SyncStep::PromptAiConfig, e),
        }
        self.publish("upload prompt assistant config", outcome)
    }

    pub async fn download_prompt_ai_config(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        match self
            .read_json::<PromptAiConfig>(
                PROMPT_AI_CONFIG_KEY,
                SyncStep::PromptAiConfig,
                &mut outcome,
            )
            .await
        {
            Ok(Some(remote)) => match self.local.prompt_ai.replace(remote) {
                Ok(_) => outcome.downloaded += 1,
                Err(e) => outcome.record(SyncStep::LocalStorage, e),
            },
            Ok(None) => {}
            Err(e) => outcome.record(SyncStep::PromptAiConfig, e),
        }
        self.publish("download prompt assistant config", outcome)
    }

    /// Push images for records the remote index lacks, then rewrite the index as the union.
    ///
    /// A record whose image push failed is left out of the index so the next upload
    /// retries it. If the index itself cannot be read nothing is written, since a
    /// rewrite would drop records other devices added.
    pub async fn upload_history(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        let _guard = self.index_lock.lock().await;

        let remote: Vec<HistoryItem> = match self
            .read_json(HISTORY_INDEX_KEY, SyncStep::HistoryIndex, &mut outcome)
            .await
        {
            Ok(remote) => remote.unwrap_or_default(),
            Err(e) => {
                outcome.record(SyncStep::HistoryIndex, e);
                return self.publish("upload history", outcome);
            }
        };

        let local = self.local.history.items();
        let pending = missing_ids(&remote, &local);
        let mut failed: HashSet<String> = HashSet::new();

        for id in pending {
            let Some(item) = local.iter().find(|item| item.id == id) else {
                continue;
            };
            match self.push_image(item).await {
                Ok(true) => outcome.uploaded += 1,
                Ok(false) => debug!("History item {} has no local image to push", id),
                Err(e) => {
                    outcome.record(SyncStep::HistoryImage, format!("{}: {}", id, e));
                    failed.insert(id.to_string());
                }
            }
        }

        let indexable: Vec<HistoryItem> = local
            .iter()
            .filter(|item| !failed.contains(&item.id))
            .cloned()
            .collect();
        let merged = union_history(&indexable, &remote);
        match self.write_json(HISTORY_INDEX_KEY, &merged).await {
            Ok(()) => info!("Remote history index now has {} items", merged.len()),
            Err(e) => outcome.record(SyncStep::HistoryIndex, e),
        }

        self.publish("upload history", outcome)
    }

    async fn push_image(&self, item: &HistoryItem) -> Result<bool> {
        let Some(bytes) = self.local.blobs.load_for_item(item).await? else {
            return Ok(false);
        };
        let blob = HistoryImageBlob {
            image_base64: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        };
        self.write_json(&history_image_key(&item.id), &blob).await?;
        Ok(true)
    }

    /// Merge remote index records into local history. Images are not fetched here.
    pub async fn download_history(&self) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        let remote: Vec<HistoryItem> = match self
            .read_json(HISTORY_INDEX_KEY, SyncStep::HistoryIndex, &mut outcome)
            .await
        {
            Ok(remote) => remote.unwrap_or_default(),
            Err(e) => {
                outcome.record(SyncStep::HistoryIndex, e);
                Vec::new()
            }
        };

        let mut added = 0;
        let merged = self.local.history.update(|local| {
            added = missing_ids(local, &remote).len();
            if added > 0 {
                *local = union_history(local, &remote);
            }
        });
        match merged {
            Ok(true) => {
                info!("Merged {} remote history items", added);
                outcome.downloaded += added;
            }
            Ok(false) => {}
            Err(e) => outcome.record(SyncStep::LocalStorage, e),
        }

        self.publish("download history", outcome)
    }

    /// Pull everything remote, then publish local-only history records.
    pub async fn sync_on_startup(&self) -> SyncOutcome {
        info!("Running startup sync");
        let mut outcome = SyncOutcome::default();
        outcome.absorb(self.download_model_configs().await);
        outcome.absorb(self.download_prompt_ai_config().await);
        outcome.absorb(self.download_history().await);
        outcome.absorb(self.upload_history().await);
        self.finish("startup sync", outcome)
    }

    async fn fetch_image(&self, id: &str) -> Result<bool> {
        let mut scratch = SyncOutcome::default();
        let blob: Option<HistoryImageBlob> = self
            .read_json(&history_image_key(id), SyncStep::HistoryImage, &mut scratch)
            .await?;
        if let Some(error) = scratch.errors.pop() {
            return Err(Error::Decode(error.message));
        }
        let Some(encoded) = blob.and_then(|b| b.image_base64) else {
            return Ok(false);
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Decode(format!("Invalid base64 image for {}: {}", id, e)))?;
        let path = self.local.blobs.save(id, &bytes).await?;
        self.local
            .history
            .set_image_url(id, path.to_string_lossy().to_string())?;
        Ok(true)
    }

    /// Download one record's image into the blob store and point the record at it.
    pub async fn fetch_history_image(&self, id: &str) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        match self.fetch_image(id).await {
            Ok(true) => outcome.downloaded += 1,
            Ok(false) => debug!("No remote image for history item {}", id),
            Err(e) => outcome.record(SyncStep::HistoryImage, format!("{}: {}", id, e)),
        }
        self.publish("fetch history image", outcome)
    }

    /// Per-item image download for a list of ids. Not part of startup sync.
    pub async fn download_history_images(&self, ids: &[String]) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        for id in ids {
            match self.fetch_image(id).await {
                Ok(true) => outcome.downloaded += 1,
                Ok(false) => {}
                Err(e) => outcome.record(SyncStep::HistoryImage, format!("{}: {}", id, e)),
            }
        }
        self.publish("download history images", outcome)
    }

    /// Ids of local records with neither a local image nor a remote URL.
    pub async fn ids_missing_images(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for item in self.local.history.items() {
            let remote_url = item
                .image_url
                .as_deref()
                .is_some_and(|url| url.starts_with("http://") || url.starts_with("https://"));
            if remote_url {
                continue;
            }
            if !matches!(self.local.blobs.load_for_item(&item).await, Ok(Some(_))) {
                missing.push(item.id);
            }
        }
        missing
    }

    /// Delete a record locally and remotely, dropping it from the index.
    pub async fn remove_history_item(&self, id: &str) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        if let Err(e) = self.local.history.remove(id) {
            outcome.record(SyncStep::LocalStorage, e);
        }
        if let Err(e) = self.local.blobs.delete(id).await {
            outcome.record(SyncStep::LocalStorage, e);
        }
        if let Err(e) = self.store.delete(&history_image_key(id)).await {
            outcome.record(SyncStep::HistoryImage, e);
        }

        let _guard = self.index_lock.lock().await;
        match self
            .read_json::<Vec<HistoryItem>>(HISTORY_INDEX_KEY, SyncStep::HistoryIndex, &mut outcome)
            .await
        {
            Ok(Some(mut remote)) => {
                let before = remote.len();
                remote.retain(|item| item.id != id);
                if remote.len() != before {
                    if let Err(e) = self.write_json(HISTORY_INDEX_KEY, &remote).await {
                        outcome.record(SyncStep::HistoryIndex, e);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => outcome.record(SyncStep::HistoryIndex, e),
        }

        self.publish("remove history item", outcome)
    }

    /// Upload in the background whenever a local storage publishes a change.
    pub fn spawn_watchers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut configs = self.local.model_configs.subscribe();
        let mut prompt_ai = self.local.prompt_ai.subscribe();
        let mut history = self.local.history.subscribe();

        let manager = self.clone();
        let config_watcher = tokio::spawn(async move {
            while configs.changed().await.is_ok() {
                manager.upload_model_configs().await;
            }
        });

        let manager = self.clone();
        let prompt_ai_watcher = tokio::spawn(async move {
            while prompt_ai.changed().await.is_ok() {
                manager.upload_prompt_ai_config().await;
            }
        });

        let manager = self;
        let history_watcher = tokio::spawn(async move {
            while history.changed().await.is_ok() {
                manager.upload_history().await;
            }
        });

        vec![config_watcher, prompt_ai_watcher, history_watcher]
    }
}
