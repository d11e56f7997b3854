//! Data models and structures
//!
//! Defines the provider-neutral generation types, the locally owned history and
//! model-configuration records mirrored to the object store, and the runtime
//! configuration loaded from the environment.

use crate::ai::mime::detect_image_mime;
use crate::ai::qwen::PollPolicy;
use crate::{Error, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    Google,
    Doubao,
    Qwen,
    OpenRouter,
    MiniMax,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Google,
        Provider::Doubao,
        Provider::Qwen,
        Provider::OpenRouter,
        Provider::MiniMax,
    ];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Google => "Google",
            Provider::Doubao => "Doubao",
            Provider::Qwen => "Qwen",
            Provider::OpenRouter => "OpenRouter",
            Provider::MiniMax => "MiniMax",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(Provider::Google),
            "doubao" | "volcengine" | "ark" => Ok(Provider::Doubao),
            "qwen" | "dashscope" => Ok(Provider::Qwen),
            "openrouter" => Ok(Provider::OpenRouter),
            "minimax" => Ok(Provider::MiniMax),
            other => Err(Error::Config(format!("Unknown provider '{}'", other))),
        }
    }
}

/// One abstract "generate an image from a prompt" call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub provider: Provider,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Pixel size such as `1024x1024`; providers that take `1024*1024` convert it.
    pub size: Option<String>,
    /// Aspect ratio hint such as `16:9`.
    pub aspect_ratio: Option<String>,
    pub sample_count: Option<u32>,
}

impl GenerationRequest {
    pub fn new(provider: Provider, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            prompt: prompt.into(),
            negative_prompt: None,
            size: None,
            aspect_ratio: None,
            sample_count: None,
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(aspect_ratio.into());
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = Some(count);
        self
    }
}

/// Where a generated image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    LocalPath(PathBuf),
    InlineBase64 { bytes: Vec<u8>, mime_type: String },
}

impl ImageRef {
    /// Decode a base64 payload, sniffing the mime type when the vendor did not send one.
    pub fn inline_from_base64(payload: &str, mime_type: Option<&str>) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::Decode(format!("Invalid base64 image payload: {}", e)))?;
        let mime_type = match mime_type {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => detect_image_mime(&bytes).to_string(),
        };
        Ok(ImageRef::InlineBase64 { bytes, mime_type })
    }

    /// Classify a vendor-supplied image string.
    ///
    /// Handles `data:` URLs, `http(s)` URLs, absolute/`file://` paths and bare base64.
    pub fn from_reference(reference: &str) -> Result<Self> {
        let reference = reference.trim();

        if let Some(rest) = reference.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::Decode("Malformed data URL".to_string()))?;
            let mime = meta.strip_suffix(";base64").unwrap_or(meta);
            return Self::inline_from_base64(payload, Some(mime));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(ImageRef::Url(reference.to_string()));
        }

        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(ImageRef::LocalPath(PathBuf::from(path)));
        }

        if reference.starts_with('/') {
            return Ok(ImageRef::LocalPath(PathBuf::from(reference)));
        }

        Self::inline_from_base64(reference, None)
    }

    /// Short human-readable description used in diagnostics and CLI output.
    pub fn describe(&self) -> String {
        match self {
            ImageRef::Url(url) => format!("url {}", url),
            ImageRef::LocalPath(path) => format!("file {}", path.display()),
            ImageRef::InlineBase64 { bytes, mime_type } => {
                format!("inline {} ({} bytes)", mime_type, bytes.len())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Image(ImageRef),
    /// The vendor answered successfully but produced no image.
    Empty,
    Failed(String),
}

/// Normalized result of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub outcome: GenerationOutcome,
    pub diagnostic: String,
}

impl GenerationResult {
    pub fn image(image: ImageRef, diagnostic: String) -> Self {
        Self {
            outcome: GenerationOutcome::Image(image),
            diagnostic,
        }
    }

    pub fn empty(diagnostic: String) -> Self {
        Self {
            outcome: GenerationOutcome::Empty,
            diagnostic,
        }
    }

    pub fn failed(message: String, diagnostic: String) -> Self {
        Self {
            outcome: GenerationOutcome::Failed(message),
            diagnostic,
        }
    }

    /// True for any non-failed outcome, including an empty result.
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, GenerationOutcome::Failed(_))
    }

    pub fn image_ref(&self) -> Option<&ImageRef> {
        match &self.outcome {
            GenerationOutcome::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            GenerationOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A generated image record. The same shape is used locally and in the remote index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub prompt: String,
    pub image_url: Option<String>,
    pub timestamp: String, // Format: yyyy-MM-dd HH:mm
    pub model: String,
    #[serde(rename = "providerGroup")]
    pub provider: Provider,
}

impl HistoryItem {
    /// Create a record stamped with the current local time; the id is the epoch millis.
    pub fn new_now(
        prompt: String,
        image_url: Option<String>,
        model: String,
        provider: Provider,
    ) -> Self {
        let now = chrono::Local::now();
        Self {
            id: now.timestamp_millis().to_string(),
            prompt,
            image_url,
            timestamp: now.format(HISTORY_TIMESTAMP_FORMAT).to_string(),
            model,
            provider,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultModelRef {
    pub group: Provider,
    pub model_name: String,
}

/// API keys and model lists for every provider group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default)]
    pub api_keys: BTreeMap<Provider, String>,
    #[serde(default)]
    pub models: BTreeMap<Provider, Vec<ModelEntry>>,
    #[serde(default, rename = "default")]
    pub default_model: Option<DefaultModelRef>,
}

impl ModelConfig {
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        self.api_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
    }

    pub fn set_api_key(&mut self, provider: Provider, key: String) {
        self.api_keys.insert(provider, key);
    }

    pub fn models_for(&self, provider: Provider) -> &[ModelEntry] {
        self.models
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_model(&self, provider: Provider, name: &str) -> bool {
        self.models_for(provider).iter().any(|m| m.name == name)
    }

    /// Add a model, replacing any existing entry with the same name.
    pub fn add_model(&mut self, provider: Provider, entry: ModelEntry) {
        let models = self.models.entry(provider).or_default();
        match models.iter_mut().find(|m| m.name == entry.name) {
            Some(existing) => *existing = entry,
            None => models.push(entry),
        }
    }

    pub fn remove_model(&mut self, provider: Provider, name: &str) -> bool {
        let Some(models) = self.models.get_mut(&provider) else {
            return false;
        };
        let before = models.len();
        models.retain(|m| m.name != name);
        let removed = models.len() != before;
        if removed {
            *self = std::mem::take(self).normalized();
        }
        removed
    }

    pub fn set_default(&mut self, provider: Provider, name: &str) -> Result<()> {
        if !self.has_model(provider, name) {
            return Err(Error::Config(format!(
                "Model '{}' is not configured for {}",
                name, provider
            )));
        }
        self.default_model = Some(DefaultModelRef {
            group: provider,
            model_name: name.to_string(),
        });
        Ok(())
    }

    /// The default model, only if it still exists in its provider's list.
    pub fn default_model(&self) -> Option<&DefaultModelRef> {
        self.default_model
            .as_ref()
            .filter(|d| self.has_model(d.group, &d.model_name))
    }

    /// Drop a default that points at a model no longer in the list.
    pub fn normalized(mut self) -> Self {
        if self.default_model.is_some() && self.default_model().is_none() {
            tracing::warn!("Dropping stale default model reference");
            self.default_model = None;
        }
        self
    }
}

/// Endpoint settings for the prompt-polishing chat completion service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptAiConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl PromptAiConfig {
    pub fn is_configured(&self) -> bool {
        [&self.base_url, &self.api_key, &self.model]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// Base URLs per vendor; overridable so tests and regional hosts can redirect calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub google: String,
    pub doubao: String,
    pub qwen: String,
    pub openrouter: String,
    pub minimax: String,
}

pub const MINIMAX_CN_BASE_URL: &str = "https://api.minimaxi.com";
pub const MINIMAX_GLOBAL_BASE_URL: &str = "https://api.minimax.io";

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            google: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            doubao: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            qwen: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            openrouter: "https://openrouter.ai/api/v1".to_string(),
            minimax: MINIMAX_CN_BASE_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every vendor at the same host, as a mock server does.
    pub fn all(base_url: &str) -> Self {
        Self {
            google: base_url.to_string(),
            doubao: base_url.to_string(),
            qwen: base_url.to_string(),
            openrouter: base_url.to_string(),
            minimax: base_url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Extra attempts for requests that never reached the server.
    pub retries: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(90),
            retries: 0,
        }
    }
}

impl HttpSettings {
    pub fn build_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()?)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub endpoints: ProviderEndpoints,
    pub http: HttpSettings,
    pub poll: PollPolicy,
    pub object_store: Option<ObjectStoreSettings>,
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = ProviderEndpoints::default();
        let minimax = match env_opt("MINIMAX_BASE_URL") {
            Some(url) => url,
            None => match env_opt("MINIMAX_REGION").as_deref() {
                None | Some("cn") => MINIMAX_CN_BASE_URL.to_string(),
                Some("global") => MINIMAX_GLOBAL_BASE_URL.to_string(),
                Some(other) => {
                    return Err(Error::Config(format!(
                        "MINIMAX_REGION must be 'cn' or 'global', got '{}'",
                        other
                    )))
                }
            },
        };

        let endpoints = ProviderEndpoints {
            google: env_opt("GOOGLE_BASE_URL").unwrap_or(defaults.google),
            doubao: env_opt("DOUBAO_BASE_URL").unwrap_or(defaults.doubao),
            qwen: env_opt("QWEN_BASE_URL").unwrap_or(defaults.qwen),
            openrouter: env_opt("OPENROUTER_BASE_URL").unwrap_or(defaults.openrouter),
            minimax,
        };

        let http = HttpSettings {
            connect_timeout: Duration::from_secs(env_parse("HTTP_CONNECT_TIMEOUT_SECS", 30)?),
            read_timeout: Duration::from_secs(env_parse("HTTP_READ_TIMEOUT_SECS", 90)?),
            retries: env_parse("HTTP_RETRIES", 0)?,
        };

        let poll = PollPolicy {
            interval: Duration::from_millis(env_parse("QWEN_POLL_INTERVAL_MS", 3000)?),
            max_attempts: env_parse("QWEN_POLL_MAX_ATTEMPTS", 60)?,
            timeout: Duration::from_secs(env_parse("QWEN_POLL_TIMEOUT_SECS", 300)?),
        };

        let object_store = match (
            env_opt("OSS_ACCESS_KEY_ID"),
            env_opt("OSS_SECRET_ACCESS_KEY"),
            env_opt("OSS_BUCKET"),
        ) {
            (Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                Some(ObjectStoreSettings {
                    access_key_id,
                    secret_access_key,
                    endpoint: env_opt("OSS_ENDPOINT"),
                    bucket,
                    region: env_opt("OSS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                })
            }
            _ => None,
        };

        Ok(Self {
            data_dir: env_opt("PROMPTSTUDIO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            endpoints,
            http,
            poll,
            object_store,
        })
    }
}
