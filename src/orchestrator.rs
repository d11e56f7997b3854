//! Uniform "generate an image from a prompt" entry point across all vendors.

use crate::ai::http::BearerHttpClient;
use crate::ai::qwen::PollPolicy;
use crate::ai::{
    DoubaoImageClient, GeminiImageClient, ImageGenerationService, MiniMaxImageClient,
    OpenRouterImageClient, QwenImageClient,
};
use crate::models::{
    Config, GenerationRequest, GenerationResult, ModelConfig, Provider, ProviderEndpoints,
};
use crate::{Error, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Dispatches generation requests to the vendor selected by each request.
///
/// API keys are read from the model-config subscription on every call, so a key
/// edited after construction is picked up by the next request.
pub struct Orchestrator {
    client: reqwest::Client,
    endpoints: ProviderEndpoints,
    poll: PollPolicy,
    retries: usize,
    configs: watch::Receiver<ModelConfig>,
}

impl Orchestrator {
    pub fn new(
        client: reqwest::Client,
        endpoints: ProviderEndpoints,
        poll: PollPolicy,
        retries: usize,
        configs: watch::Receiver<ModelConfig>,
    ) -> Self {
        Self {
            client,
            endpoints,
            poll,
            retries,
            configs,
        }
    }

    pub fn from_config(config: &Config, configs: watch::Receiver<ModelConfig>) -> Result<Self> {
        Ok(Self::new(
            config.http.build_client()?,
            config.endpoints.clone(),
            config.poll,
            config.http.retries,
            configs,
        ))
    }

    fn bearer(&self, provider: Provider, api_key: String, base_url: &str) -> BearerHttpClient {
        BearerHttpClient::new(provider, api_key, base_url.to_string(), self.client.clone())
            .with_retries(self.retries)
    }

    fn service_for(&self, provider: Provider, api_key: String) -> Box<dyn ImageGenerationService> {
        match provider {
            Provider::Google => Box::new(GeminiImageClient::new(
                api_key,
                self.endpoints.google.clone(),
                self.client.clone(),
            )),
            Provider::Doubao => Box::new(DoubaoImageClient::new(self.bearer(
                provider,
                api_key,
                &self.endpoints.doubao,
            ))),
            Provider::Qwen => Box::new(QwenImageClient::new(
                self.bearer(provider, api_key, &self.endpoints.qwen),
                self.poll,
            )),
            Provider::OpenRouter => Box::new(OpenRouterImageClient::new(self.bearer(
                provider,
                api_key,
                &self.endpoints.openrouter,
            ))),
            Provider::MiniMax => Box::new(MiniMaxImageClient::new(self.bearer(
                provider,
                api_key,
                &self.endpoints.minimax,
            ))),
        }
    }

    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        self.generate_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run one request; every failure is folded into the returned result.
    pub async fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> GenerationResult {
        let label = format!("{}/{}", request.provider, request.model);

        if request.prompt.trim().is_empty() {
            return GenerationResult::failed(
                "Prompt is empty".to_string(),
                format!("{}: request rejected before dispatch", label),
            );
        }

        let api_key = self
            .configs
            .borrow()
            .api_key(request.provider)
            .map(str::to_string);
        let Some(api_key) = api_key else {
            warn!("No API key configured for {}", request.provider);
            return GenerationResult::failed(
                format!("No API key configured for {}", request.provider),
                format!("{}: missing API key", label),
            );
        };

        info!("Generating image with {}", label);
        let service = self.service_for(request.provider, api_key);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = service.generate_image(request, &cancel) => outcome,
        };

        match outcome {
            Ok(Some(image)) => {
                let diagnostic = format!("{}: {}", label, image.describe());
                info!("Generated {}", diagnostic);
                GenerationResult::image(image, diagnostic)
            }
            Ok(None) => {
                warn!("{} returned no image", label);
                GenerationResult::empty(format!("{}: vendor returned no image", label))
            }
            Err(e) => {
                warn!("{} failed: {}", label, e);
                GenerationResult::failed(user_message(&e), diagnostic(&label, &e))
            }
        }
    }
}

/// Vendor-reported messages are shown verbatim; everything else uses the error's display.
fn user_message(error: &Error) -> String {
    match error {
        Error::Vendor { message, .. } if !message.is_empty() => message.clone(),
        other => other.to_string(),
    }
}

fn diagnostic(label: &str, error: &Error) -> String {
    match error {
        Error::Transport {
            status: Some(status),
            message,
            ..
        } => format!("{}: HTTP {}: {}", label, status, message),
        Error::Transport {
            status: None,
            message,
            ..
        } => format!("{}: network error: {}", label, message),
        Error::Vendor { code, message, .. } => {
            format!("{}: vendor error {}: {}", label, code, message)
        }
        other => format!("{}: {}", label, other),
    }
}
