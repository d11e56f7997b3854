//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror.

use crate::models::Provider;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} transport error{}: {message}", status_suffix(.status))]
    Transport {
        provider: Provider,
        status: Option<u16>,
        message: String,
    },

    #[error("{provider} reported error {code}: {message}")]
    Vendor {
        provider: Provider,
        code: String,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Task {task_id} did not finish after {attempts} polls")]
    PollExhausted { task_id: String, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (status {})", code))
        .unwrap_or_default()
}
