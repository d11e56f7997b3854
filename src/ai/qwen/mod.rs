//! DashScope (Qwen / Wanx) image generation.
//!
//! Two endpoint families are supported: the asynchronous text2image task API,
//! which requires submit-then-poll, and the synchronous multimodal generation API.

pub mod image;
pub mod task;
pub mod types;

pub use image::{QwenImageClient, QwenRoute};
pub use task::{PollPolicy, TaskPhase, TaskPoller, TaskTerminal, VendorTask};
