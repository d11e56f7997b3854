//! Streaming prompt polishing against an OpenAI-compatible chat completion endpoint
//!
//! The response body is read incrementally as Server-Sent Events and surfaced as a
//! cancelable sequence of [`StreamEvent`]s.

pub mod client;
pub mod sse;

pub use client::{PolishClient, PolishStream};
pub use sse::{parse_line, SseLineBuffer};

use crate::prompts;
use crate::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolishMode {
    #[default]
    Refine,
    TranslateToEnglish,
}

impl PolishMode {
    pub(crate) fn user_instruction(self, source: &str) -> String {
        let template = match self {
            PolishMode::Refine => prompts::POLISH_REFINE,
            PolishMode::TranslateToEnglish => prompts::POLISH_TRANSLATE,
        };
        prompts::render(template, &[("text", source)])
    }
}

impl fmt::Display for PolishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolishMode::Refine => write!(f, "refine"),
            PolishMode::TranslateToEnglish => write!(f, "translate"),
        }
    }
}

impl FromStr for PolishMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "refine" => Ok(PolishMode::Refine),
            "translate" | "translate-to-english" | "english" => Ok(PolishMode::TranslateToEnglish),
            other => Err(Error::Config(format!("Unknown polish mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Completed,
    /// A recoverable per-line failure, or the final event of a failed stream.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolishState {
    Idle,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl PolishState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PolishState::Completed | PolishState::Errored | PolishState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Refine".parse::<PolishMode>().unwrap(), PolishMode::Refine);
        assert_eq!(
            "translate".parse::<PolishMode>().unwrap(),
            PolishMode::TranslateToEnglish
        );
        assert!("summarize".parse::<PolishMode>().is_err());
    }

    #[test]
    fn test_user_instruction_embeds_source() {
        let text = PolishMode::TranslateToEnglish.user_instruction("一只猫, 16:9");
        assert!(text.contains("一只猫, 16:9"));
        assert!(text.contains("English"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PolishState::Idle.is_terminal());
        assert!(!PolishState::Streaming.is_terminal());
        assert!(PolishState::Cancelled.is_terminal());
    }
}
