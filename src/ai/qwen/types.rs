//! DashScope request/response payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct Text2ImageRequest {
    pub model: String,
    pub input: Text2ImageInput,
    pub parameters: Text2ImageParameters,
}

#[derive(Debug, Serialize)]
pub struct Text2ImageInput {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Text2ImageParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    pub prompt_extend: bool,
    pub watermark: bool,
}

/// Envelope shared by task submission and task status queries.
#[derive(Debug, Deserialize)]
pub struct TaskResponse {
    pub request_id: Option<String>,
    pub output: Option<TaskOutput>,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskOutput {
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub results: Vec<TaskResultItem>,
    #[serde(alias = "error_code")]
    pub code: Option<String>,
    #[serde(alias = "error_message")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskResultItem {
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub b64_json: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MultimodalRequest {
    pub model: String,
    pub input: MultimodalInput,
    pub parameters: MultimodalParameters,
}

#[derive(Debug, Serialize)]
pub struct MultimodalInput {
    pub messages: Vec<MultimodalMessage>,
}

#[derive(Debug, Serialize)]
pub struct MultimodalMessage {
    pub role: String,
    pub content: Vec<MultimodalTextPart>,
}

#[derive(Debug, Serialize)]
pub struct MultimodalTextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MultimodalParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    pub prompt_extend: bool,
    pub watermark: bool,
}

#[derive(Debug, Deserialize)]
pub struct MultimodalResponse {
    pub output: Option<MultimodalOutput>,
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MultimodalOutput {
    #[serde(default)]
    pub choices: Vec<MultimodalChoice>,
}

#[derive(Debug, Deserialize)]
pub struct MultimodalChoice {
    pub message: MultimodalResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct MultimodalResponseMessage {
    #[serde(default)]
    pub content: Vec<MultimodalContentItem>,
}

#[derive(Debug, Deserialize)]
pub struct MultimodalContentItem {
    pub image: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "b64Json", alias = "b64_json")]
    pub b64_json: Option<String>,
}
