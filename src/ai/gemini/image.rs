use super::client::GeminiHttpClient;
use super::types::{
    Content, GenerateContentResponse, ImageConfig, ImageGenerationConfig, ImageRequest, Part,
};
use crate::ai::ImageGenerationService;
use crate::models::{GenerationRequest, ImageRef};
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct GeminiImageClient {
    http: GeminiHttpClient,
}

impl GeminiImageClient {
    pub fn new(api_key: String, base_url: String, client: reqwest::Client) -> Self {
        Self {
            http: GeminiHttpClient::new(api_key, base_url, client),
        }
    }

    fn build_request(request: &GenerationRequest) -> ImageRequest {
        ImageRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::Text {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: ImageGenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
                image_config: request.aspect_ratio.as_ref().map(|ratio| ImageConfig {
                    aspect_ratio: ratio.clone(),
                }),
            },
        }
    }

    fn extract_image(response: &GenerateContentResponse) -> Result<Option<ImageRef>> {
        let inline = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| {
                content.parts.iter().find_map(|p| match p {
                    Part::InlineData { inline_data } => Some(inline_data),
                    _ => None,
                })
            });

        match inline {
            Some(data) => {
                tracing::debug!("Gemini returned image with mime_type: {}", data.mime_type);
                ImageRef::inline_from_base64(&data.data, Some(&data.mime_type)).map(Some)
            }
            None => {
                let reason = response
                    .prompt_feedback
                    .as_ref()
                    .and_then(|f| f.block_reason.clone())
                    .or_else(|| {
                        response
                            .candidates
                            .first()
                            .and_then(|c| c.finish_reason.clone())
                    })
                    .unwrap_or_else(|| "none".to_string());
                tracing::warn!("Gemini response carried no inline image (reason: {})", reason);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ImageGenerationService for GeminiImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        let body = Self::build_request(request);
        let response: GenerateContentResponse =
            self.http.generate_content(&request.model, &body).await?;
        Self::extract_image(&response)
    }
}
