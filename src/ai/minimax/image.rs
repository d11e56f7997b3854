use super::types::{parse_dimensions, ImageGenerationRequest};
use crate::ai::http::BearerHttpClient;
use crate::ai::ImageGenerationService;
use crate::models::{GenerationRequest, ImageRef, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub struct MiniMaxImageClient {
    http: BearerHttpClient,
}

impl MiniMaxImageClient {
    pub fn new(http: BearerHttpClient) -> Self {
        Self { http }
    }

    fn build_request(request: &GenerationRequest) -> ImageGenerationRequest {
        // An explicit aspect ratio wins; otherwise fall back to pixel dimensions.
        let dimensions = match request.aspect_ratio {
            Some(_) => None,
            None => request.size.as_deref().and_then(parse_dimensions),
        };

        ImageGenerationRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            aspect_ratio: request.aspect_ratio.clone(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            response_format: "url".to_string(),
            n: 1,
        }
    }

    /// `base_resp.status_code` is 0 on success.
    fn check_status(response: &Value) -> Result<()> {
        let Some(base_resp) = response.get("base_resp") else {
            return Ok(());
        };
        let code = base_resp
            .get("status_code")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if code == 0 {
            return Ok(());
        }
        Err(Error::Vendor {
            provider: Provider::MiniMax,
            code: code.to_string(),
            message: base_resp
                .get("status_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Pull the first image out of whichever url/base64-shaped field is present.
    pub fn extract_image(response: &Value) -> Result<Option<ImageRef>> {
        let first_str = |pointer: &str| -> Option<String> {
            let value = response.pointer(pointer)?;
            let value = match value {
                Value::Array(items) => items.first()?,
                other => other,
            };
            value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(url) = first_str("/data/image_urls") {
            return ImageRef::from_reference(&url).map(Some);
        }
        if let Some(b64) = first_str("/data/image_base64") {
            return ImageRef::inline_from_base64(&b64, None).map(Some);
        }
        for pointer in ["/data/0/url", "/data/url", "/url"] {
            if let Some(url) = first_str(pointer) {
                return ImageRef::from_reference(&url).map(Some);
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ImageGenerationService for MiniMaxImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        let body = Self::build_request(request);
        let response: Value = self.http.post("v1/image_generation", &body).await?;

        Self::check_status(&response)?;
        Self::extract_image(&response)
    }
}
