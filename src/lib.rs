//! Prompt studio core - multi-provider image generation, streaming prompt polishing,
//! and best-effort cloud sync of configuration and history
//!
//! Five structurally different vendor APIs are normalized behind one
//! [`orchestrator::Orchestrator::generate`] call; prompts can be rewritten through a
//! streaming chat completion; local state is mirrored to an S3-compatible bucket.

pub mod ai;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod polish;
pub mod prompts;
pub mod storage;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
