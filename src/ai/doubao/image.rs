use super::types::{ImageGenerationRequest, ImageGenerationResponse};
use crate::ai::http::BearerHttpClient;
use crate::ai::ImageGenerationService;
use crate::models::{GenerationRequest, ImageRef, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct DoubaoImageClient {
    http: BearerHttpClient,
}

impl DoubaoImageClient {
    pub fn new(http: BearerHttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageGenerationService for DoubaoImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        let body = ImageGenerationRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            size: request.size.clone(),
            response_format: "url".to_string(),
            watermark: false,
        };

        let response: ImageGenerationResponse =
            self.http.post("images/generations", &body).await?;

        if let Some(error) = response.error {
            return Err(Error::Vendor {
                provider: Provider::Doubao,
                code: error.code,
                message: error.message,
            });
        }

        let Some(image_data) = response.data.first() else {
            return Ok(None);
        };

        if let Some(url) = image_data.url.as_deref().filter(|u| !u.is_empty()) {
            Ok(Some(ImageRef::Url(url.to_string())))
        } else if let Some(b64_json) = image_data.b64_json.as_deref().filter(|b| !b.is_empty()) {
            ImageRef::inline_from_base64(b64_json, None).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> DoubaoImageClient {
        DoubaoImageClient::new(BearerHttpClient::new(
            Provider::Doubao,
            "ark-key".to_string(),
            server.uri(),
            reqwest::Client::new(),
        ))
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(Provider::Doubao, "doubao-seedream-3-0-t2i-250415", "a fox")
            .with_size("1024x1024")
    }

    #[tokio::test]
    async fn test_sends_flat_request_and_returns_url() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(header("Authorization", "Bearer ark-key"))
            .and(body_json(serde_json::json!({
                "model": "doubao-seedream-3-0-t2i-250415",
                "prompt": "a fox",
                "size": "1024x1024",
                "response_format": "url",
                "watermark": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "doubao-seedream-3-0-t2i-250415",
                "data": [{ "url": "https://ark.example.com/fox.jpeg" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let image = make_client(&server)
            .generate_image(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            image,
            Some(ImageRef::Url("https://ark.example.com/fox.jpeg".to_string()))
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_b64_json() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "b64_json": "/9j/4A==" }]
            })))
            .mount(&server)
            .await;

        let image = make_client(&server)
            .generate_image(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            image,
            Some(ImageRef::InlineBase64 {
                bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
                mime_type: "image/jpeg".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_empty_data_is_empty_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": []
            })))
            .mount(&server)
            .await;

        let image = make_client(&server)
            .generate_image(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(image.is_none());
    }

    #[tokio::test]
    async fn test_error_envelope_is_vendor_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": { "code": "InputTextSensitiveContentDetected", "message": "blocked" }
            })))
            .mount(&server)
            .await;

        let err = make_client(&server)
            .generate_image(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::Vendor { code, message, .. } => {
                assert_eq!(code, "InputTextSensitiveContentDetected");
                assert_eq!(message, "blocked");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
