use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ImageConfig};
use crate::ai::http::BearerHttpClient;
use crate::ai::ImageGenerationService;
use crate::models::{GenerationRequest, ImageRef, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct OpenRouterImageClient {
    http: BearerHttpClient,
}

impl OpenRouterImageClient {
    pub fn new(http: BearerHttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageGenerationService for OpenRouterImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            modalities: vec!["text".to_string(), "image".to_string()],
            image_config: request.aspect_ratio.as_ref().map(|ratio| ImageConfig {
                aspect_ratio: ratio.clone(),
            }),
        };

        let response: ChatCompletionResponse = self.http.post("chat/completions", &body).await?;

        if let Some(error) = response.error {
            return Err(Error::Vendor {
                provider: Provider::OpenRouter,
                code: error
                    .code
                    .map(|c| c.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
                message: error.message,
            });
        }

        let Some(choice) = response.choices.first() else {
            return Ok(None);
        };

        match choice.message.images.as_ref().and_then(|images| images.first()) {
            Some(attachment) => ImageRef::from_reference(&attachment.image_url.url).map(Some),
            None => {
                tracing::info!(
                    "OpenRouter returned no images (finish_reason: {})",
                    choice.finish_reason.as_deref().unwrap_or("unknown")
                );
                Ok(None)
            }
        }
    }
}
