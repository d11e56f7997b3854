//! Bearer-token JSON transport shared by Doubao, Qwen, OpenRouter and MiniMax.

use crate::models::Provider;
use crate::{Error, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_retry::{strategy::FixedInterval, Retry};

const ERROR_BODY_SNIPPET_CHARS: usize = 512;
const RETRY_INTERVAL_MS: u64 = 1000;

/// Truncate a response body for use in diagnostics.
pub(crate) fn body_snippet(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_SNIPPET_CHARS {
        return body.to_string();
    }
    let truncated: String = body.chars().take(ERROR_BODY_SNIPPET_CHARS).collect();
    format!("{}...", truncated)
}

/// Turn a non-2xx response into [`Error::Transport`], logging it once.
pub(crate) async fn ensure_success(provider: Provider, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    tracing::error!(
        "{} API error (status {}): {}",
        provider,
        status,
        body_snippet(&error_text)
    );
    Err(Error::Transport {
        provider,
        status: Some(status.as_u16()),
        message: body_snippet(&error_text),
    })
}

/// Read the body and decode it, reporting malformed JSON as [`Error::Decode`].
pub(crate) async fn decode_json<Resp: DeserializeOwned>(
    provider: Provider,
    response: Response,
) -> Result<Resp> {
    let body = response.text().await.map_err(|e| Error::Transport {
        provider,
        status: None,
        message: format!("Failed to read response body: {}", e),
    })?;
    serde_json::from_str(&body).map_err(|e| {
        tracing::error!(
            "Failed to parse {} response: {}\nBody: {}",
            provider,
            e,
            body_snippet(&body)
        );
        Error::Decode(format!("Failed to parse {} response: {}", provider, e))
    })
}

pub struct BearerHttpClient {
    pub(crate) client: Client,
    api_key: String,
    pub(crate) base_url: String,
    provider: Provider,
    retries: usize,
}

impl BearerHttpClient {
    pub fn new(provider: Provider, api_key: String, base_url: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider,
            retries: 0,
        }
    }

    /// Retry requests that failed before any response arrived.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let strategy = FixedInterval::from_millis(RETRY_INTERVAL_MS).take(self.retries);
        let provider = self.provider;
        let build = &build;
        let authorization = format!("Bearer {}", self.api_key);
        let authorization = authorization.as_str();

        let response = Retry::spawn(strategy, move || {
            let request = build().header("Authorization", authorization);
            async move {
                request.send().await.map_err(|e| {
                    tracing::warn!("Failed to send request to {}: {}", provider, e);
                    e
                })
            }
        })
        .await
        .map_err(|e| {
            tracing::error!("Request to {} failed: {}", provider, e);
            Error::Transport {
                provider,
                status: None,
                message: e.to_string(),
            }
        })?;

        ensure_success(provider, response).await
    }

    pub async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        self.post_with_headers(path, request, &[]).await
    }

    pub async fn post_with_headers<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
        headers: &[(&str, &str)],
    ) -> Result<Resp> {
        let url = self.url(path);
        tracing::debug!("POST {} ({})", url, self.provider);

        let response = self
            .send(|| {
                let mut builder = self.client.post(&url).json(request);
                for (name, value) in headers {
                    builder = builder.header(*name, *value);
                }
                builder
            })
            .await?;

        decode_json(self.provider, response).await
    }

    pub async fn get<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp> {
        let url = self.url(path);
        tracing::debug!("GET {} ({})", url, self.provider);

        let response = self.send(|| self.client.get(&url)).await?;
        decode_json(self.provider, response).await
    }
}
