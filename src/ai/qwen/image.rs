use super::task::{PollPolicy, TaskPoller, TaskTerminal};
use super::types::{
    MultimodalInput, MultimodalMessage, MultimodalParameters, MultimodalRequest,
    MultimodalResponse, MultimodalTextPart, TaskResponse, Text2ImageInput, Text2ImageParameters,
    Text2ImageRequest,
};
use crate::ai::http::BearerHttpClient;
use crate::ai::ImageGenerationService;
use crate::models::{GenerationRequest, ImageRef, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

const TEXT2IMAGE_PATH: &str = "services/aigc/text2image/image-synthesis";
const MULTIMODAL_PATH: &str = "services/aigc/multimodal-generation/generation";

/// Which DashScope endpoint family serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QwenRoute {
    AsyncTask,
    Multimodal,
}

impl QwenRoute {
    pub fn for_model(model: &str) -> Self {
        if model.to_ascii_lowercase().contains("qwen-image") {
            QwenRoute::Multimodal
        } else {
            QwenRoute::AsyncTask
        }
    }
}

/// DashScope expects `1024*1024` where other vendors take `1024x1024`.
fn dashscope_size(size: Option<&str>) -> Option<String> {
    size.map(|s| s.replace(['x', 'X'], "*"))
}

fn populated(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Base64 fields carry raw payloads; a JPEG one starts with `/9j/` and must never
/// be classified as a path.
fn inline_payload(payload: &str) -> Result<ImageRef> {
    if payload.trim_start().starts_with("data:") {
        ImageRef::from_reference(payload)
    } else {
        ImageRef::inline_from_base64(payload, None)
    }
}

pub struct QwenImageClient {
    http: BearerHttpClient,
    poll: PollPolicy,
}

impl QwenImageClient {
    pub fn new(http: BearerHttpClient, poll: PollPolicy) -> Self {
        Self { http, poll }
    }

    /// Submit an asynchronous text2image task and return its id.
    pub async fn submit_task(&self, request: &GenerationRequest) -> Result<String> {
        let body = Text2ImageRequest {
            model: request.model.clone(),
            input: Text2ImageInput {
                prompt: request.prompt.clone(),
                negative_prompt: request.negative_prompt.clone(),
            },
            parameters: Text2ImageParameters {
                size: dashscope_size(request.size.as_deref()),
                n: request.sample_count,
                prompt_extend: true,
                watermark: false,
            },
        };

        let response: TaskResponse = self
            .http
            .post_with_headers(TEXT2IMAGE_PATH, &body, &[("X-DashScope-Async", "enable")])
            .await?;

        match response.output {
            Some(output) if !output.task_id.is_empty() => {
                tracing::info!(
                    "Submitted Qwen task {} (request {})",
                    output.task_id,
                    response.request_id.as_deref().unwrap_or("-")
                );
                Ok(output.task_id)
            }
            _ => Err(Error::Vendor {
                provider: Provider::Qwen,
                code: response.code.unwrap_or_else(|| "NoTaskId".to_string()),
                message: response
                    .message
                    .unwrap_or_else(|| "Task submission returned no task_id".to_string()),
            }),
        }
    }

    async fn generate_async(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        let task_id = self.submit_task(request).await?;

        match TaskPoller::new(&self.http, self.poll)
            .run(task_id, cancel)
            .await?
        {
            TaskTerminal::Succeeded(task) => {
                let Some(item) = task.result_items.first() else {
                    return Ok(None);
                };
                if let Some(reference) =
                    populated(item.url.as_ref()).or_else(|| populated(item.image_url.as_ref()))
                {
                    return ImageRef::from_reference(reference).map(Some);
                }
                if let Some(payload) = populated(item.b64_json.as_ref()) {
                    return inline_payload(payload).map(Some);
                }
                match &item.code {
                    Some(code) => Err(Error::Vendor {
                        provider: Provider::Qwen,
                        code: code.clone(),
                        message: item.message.clone().unwrap_or_default(),
                    }),
                    None => Ok(None),
                }
            }
            TaskTerminal::Failed { code, message } => Err(Error::Vendor {
                provider: Provider::Qwen,
                code,
                message,
            }),
            TaskTerminal::Exhausted { task_id, attempts } => {
                tracing::warn!("Qwen task {} still pending after {} polls", task_id, attempts);
                Err(Error::PollExhausted { task_id, attempts })
            }
        }
    }

    async fn generate_multimodal(&self, request: &GenerationRequest) -> Result<Option<ImageRef>> {
        let body = MultimodalRequest {
            model: request.model.clone(),
            input: MultimodalInput {
                messages: vec![MultimodalMessage {
                    role: "user".to_string(),
                    content: vec![MultimodalTextPart {
                        text: request.prompt.clone(),
                    }],
                }],
            },
            parameters: MultimodalParameters {
                negative_prompt: request.negative_prompt.clone(),
                size: dashscope_size(request.size.as_deref()),
                n: request.sample_count,
                prompt_extend: true,
                watermark: false,
            },
        };

        let response: MultimodalResponse = self.http.post(MULTIMODAL_PATH, &body).await?;

        let Some(output) = response.output else {
            return match response.code {
                Some(code) => Err(Error::Vendor {
                    provider: Provider::Qwen,
                    code,
                    message: response.message.unwrap_or_default(),
                }),
                None => Ok(None),
            };
        };

        let Some(choice) = output.choices.first() else {
            return Ok(None);
        };
        let content = &choice.message.content;

        // Each field is searched across the whole content list before the next one.
        if let Some(image) = content.iter().find_map(|item| populated(item.image.as_ref())) {
            return ImageRef::from_reference(image).map(Some);
        }
        if let Some(url) = content.iter().find_map(|item| populated(item.url.as_ref())) {
            return ImageRef::from_reference(url).map(Some);
        }
        content
            .iter()
            .find_map(|item| populated(item.b64_json.as_ref()))
            .map(inline_payload)
            .transpose()
    }
}

#[async_trait]
impl ImageGenerationService for QwenImageClient {
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>> {
        match QwenRoute::for_model(&request.model) {
            QwenRoute::AsyncTask => self.generate_async(request, cancel).await,
            QwenRoute::Multimodal => self.generate_multimodal(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> QwenImageClient {
        QwenImageClient::new(
            BearerHttpClient::new(
                Provider::Qwen,
                "ds-key".to_string(),
                server.uri(),
                reqwest::Client::new(),
            ),
            PollPolicy {
                interval: Duration::from_millis(5),
                max_attempts: 10,
                timeout: Duration::from_secs(30),
            },
        )
    }

    async fn mount_submit(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/services/aigc/text2image/image-synthesis"))
            .and(header("X-DashScope-Async", "enable"))
            .and(header("Authorization", "Bearer ds-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "wanx2.1-t2i-turbo",
                "input": { "prompt": "a lantern" },
                "parameters": { "size": "1024*1024", "n": 1 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "request_id": "req-1",
                "output": { "task_id": "task-9", "task_status": "PENDING" }
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn async_request() -> GenerationRequest {
        GenerationRequest::new(Provider::Qwen, "wanx2.1-t2i-turbo", "a lantern")
            .with_size("1024x1024")
            .with_sample_count(1)
    }

    #[test]
    fn test_route_by_model_name() {
        assert_eq!(QwenRoute::for_model("qwen-image-plus"), QwenRoute::Multimodal);
        assert_eq!(QwenRoute::for_model("wanx2.1-t2i-turbo"), QwenRoute::AsyncTask);
    }

    #[tokio::test]
    async fn test_async_path_submits_then_polls_to_success() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path("/tasks/task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": { "task_id": "task-9", "task_status": "PENDING" }
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "task_id": "task-9",
                    "task_status": "SUCCEEDED",
                    "results": [{ "image_url": "https://dashscope.example.com/b.png", "url": "https://dashscope.example.com/a.png" }]
                }
            })))
            .mount(&server)
            .await;

        let image = make_client(&server)
            .generate_image(&async_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            image,
            Some(ImageRef::Url("https://dashscope.example.com/a.png".to_string()))
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_async_failed_task_surfaces_vendor_message() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path("/tasks/task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "task_id": "task-9",
                    "task_status": "FAILED",
                    "code": "DataInspectionFailed",
                    "message": "Input data may contain inappropriate content."
                }
            })))
            .mount(&server)
            .await;

        let err = make_client(&server)
            .generate_image(&async_request(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Vendor { code, message, .. } => {
                assert_eq!(code, "DataInspectionFailed");
                assert_eq!(message, "Input data may contain inappropriate content.");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_without_task_id_is_vendor_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/aigc/text2image/image-synthesis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "InvalidApiKey",
                "message": "Invalid API-key provided."
            })))
            .mount(&server)
            .await;

        let err = make_client(&server)
            .submit_task(&async_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Vendor { ref code, .. } if code == "InvalidApiKey"));
    }

    #[tokio::test]
    async fn test_multimodal_prefers_image_field() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/aigc/multimodal-generation/generation"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen-image",
                "input": { "messages": [{ "role": "user", "content": [{ "text": "a pagoda" }] }] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": [{
                                "url": "https://dashscope.example.com/url.png",
                                "image": "https://dashscope.example.com/image.png"
                            }]
                        }
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest::new(Provider::Qwen, "qwen-image", "a pagoda");
        let image = make_client(&server)
            .generate_image(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            image,
            Some(ImageRef::Url("https://dashscope.example.com/image.png".to_string()))
        );
    }

    #[tokio::test]
    async fn test_async_jpeg_b64_json_stays_inline() {
        let server = MockServer::start().await;
        mount_submit(&server).await;

        Mock::given(method("GET"))
            .and(path("/tasks/task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "task_id": "task-9",
                    "task_status": "SUCCEEDED",
                    "results": [{ "b64_json": "/9j/4AAQSkZJRg==" }]
                }
            })))
            .mount(&server)
            .await;

        let image = make_client(&server)
            .generate_image(&async_request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            image,
            Some(ImageRef::InlineBase64 { ref mime_type, .. }) if mime_type == "image/jpeg"
        ));
    }

    #[tokio::test]
    async fn test_multimodal_image_field_wins_across_items() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/aigc/multimodal-generation/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "choices": [{
                        "message": {
                            "content": [
                                { "url": "https://dashscope.example.com/url.png" },
                                { "image": "https://dashscope.example.com/image.png" }
                            ]
                        }
                    }]
                }
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new(Provider::Qwen, "qwen-image", "a pagoda");
        let image = make_client(&server)
            .generate_image(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            image,
            Some(ImageRef::Url("https://dashscope.example.com/image.png".to_string()))
        );
    }

    #[tokio::test]
    async fn test_multimodal_jpeg_b64_json_stays_inline() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/aigc/multimodal-generation/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "choices": [{ "message": { "content": [{ "text": "done" }, { "b64Json": "/9j/4AAQSkZJRg==" }] } }]
                }
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new(Provider::Qwen, "qwen-image", "a pagoda");
        let image = make_client(&server)
            .generate_image(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            image,
            Some(ImageRef::InlineBase64 { ref mime_type, .. }) if mime_type == "image/jpeg"
        ));
    }

    #[tokio::test]
    async fn test_multimodal_falls_back_to_b64_json() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/aigc/multimodal-generation/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "choices": [{ "message": { "content": [{ "b64Json": "iVBORw0KGgo=" }] } }]
                }
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new(Provider::Qwen, "qwen-image", "a pagoda");
        let image = make_client(&server)
            .generate_image(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            image,
            Some(ImageRef::InlineBase64 { ref mime_type, .. }) if mime_type == "image/png"
        ));
    }
}
