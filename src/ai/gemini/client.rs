use crate::ai::http::{decode_json, ensure_success};
use crate::models::Provider;
use crate::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Gemini REST client. Unlike the bearer vendors, Gemini authenticates with `x-goog-api-key`.
pub struct GeminiHttpClient {
    pub(crate) client: Client,
    api_key: String,
    pub(crate) base_url: String,
}

impl GeminiHttpClient {
    pub fn new(api_key: String, base_url: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Calls `models/{model}:generateContent`.
    ///
    /// A `models/`-prefixed model ID is accepted and normalized.
    pub async fn generate_content<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        model: &str,
        request: &Req,
    ) -> Result<Resp> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to Gemini: {}", e);
                Error::Transport {
                    provider: Provider::Google,
                    status: None,
                    message: e.to_string(),
                }
            })?;

        let response = ensure_success(Provider::Google, response).await?;
        decode_json(Provider::Google, response).await
    }
}
