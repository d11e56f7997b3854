pub mod image;
pub mod types;

pub use image::OpenRouterImageClient;
