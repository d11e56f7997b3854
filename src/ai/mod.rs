//! Image-generation provider integrations
//!
//! Each vendor module pairs its wire types with a transport client and an
//! [`ImageGenerationService`] that maps a [`GenerationRequest`] onto that vendor's API.

pub mod doubao;
pub mod gemini;
pub mod http;
pub mod mime;
pub mod minimax;
pub mod openrouter;
pub mod qwen;

pub use doubao::DoubaoImageClient;
pub use gemini::GeminiImageClient;
pub use minimax::MiniMaxImageClient;
pub use openrouter::OpenRouterImageClient;
pub use qwen::QwenImageClient;

use crate::models::{GenerationRequest, ImageRef};
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Issue the vendor call(s) for one request.
    ///
    /// `Ok(None)` means the vendor answered successfully without producing an image.
    async fn generate_image(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>>;
}
