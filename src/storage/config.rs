use super::{KeyValueStore, PublishedValue};
use crate::models::{ModelConfig, PromptAiConfig};
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;

const MODEL_CONFIG_KEY: &str = "model_configs";
const PROMPT_AI_CONFIG_KEY: &str = "prompt_ai_config";

/// Locally owned API keys and model lists.
pub struct ModelConfigStorage {
    value: PublishedValue<ModelConfig>,
}

impl ModelConfigStorage {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let value = PublishedValue::load(kv, MODEL_CONFIG_KEY)?;
        let storage = Self { value };
        // A default left pointing at a deleted model is dropped on read.
        storage.value.set(storage.value.get().normalized())?;
        Ok(storage)
    }

    pub fn snapshot(&self) -> ModelConfig {
        self.value.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelConfig> {
        self.value.subscribe()
    }

    /// Apply an edit and persist it. Returns whether anything changed.
    pub fn update(&self, edit: impl FnOnce(&mut ModelConfig)) -> Result<bool> {
        self.value.update(|config| {
            edit(config);
            *config = std::mem::take(config).normalized();
        })
    }

    pub fn replace(&self, config: ModelConfig) -> Result<bool> {
        self.value.set(config.normalized())
    }
}

/// Endpoint settings for the prompt-polishing assistant.
pub struct PromptAiConfigStorage {
    value: PublishedValue<PromptAiConfig>,
}

impl PromptAiConfigStorage {
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        Ok(Self {
            value: PublishedValue::load(kv, PROMPT_AI_CONFIG_KEY)?,
        })
    }

    pub fn snapshot(&self) -> PromptAiConfig {
        self.value.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<PromptAiConfig> {
        self.value.subscribe()
    }

    pub fn replace(&self, config: PromptAiConfig) -> Result<bool> {
        self.value.set(config)
    }
}
