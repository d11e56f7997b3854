//! Best-effort backup of configuration and history to a remote object store
//!
//! Remote layout (bucket-relative keys):
//! - `model_configs.json`: the whole [`ModelConfig`](crate::models::ModelConfig)
//! - `prompt_ai_config.json`: the whole [`PromptAiConfig`](crate::models::PromptAiConfig)
//! - `history_ids.json`: every known history record without its image
//! - `history/<id>.json`: `{"imageBase64": ...}` for one record

pub mod history;
pub mod manager;

pub use history::union_history;
pub use manager::{SyncError, SyncEvent, SyncManager, SyncOutcome, SyncStep};

use serde::{Deserialize, Serialize};

pub const MODEL_CONFIGS_KEY: &str = "model_configs.json";
pub const PROMPT_AI_CONFIG_KEY: &str = "prompt_ai_config.json";
pub const HISTORY_INDEX_KEY: &str = "history_ids.json";

pub fn history_image_key(id: &str) -> String {
    format!("history/{}.json", id)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryImageBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}
