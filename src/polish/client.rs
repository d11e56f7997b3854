use super::sse::{parse_line, SseLineBuffer};
use super::{PolishMode, PolishState, StreamEvent};
use crate::ai::http::body_snippet;
use crate::models::PromptAiConfig;
use crate::prompts;
use crate::{Error, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

pub struct PolishClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl PolishClient {
    pub fn new(config: &PromptAiConfig, client: Client) -> Result<Self> {
        match (&config.base_url, &config.api_key, &config.model) {
            (Some(base_url), Some(api_key), Some(model)) if config.is_configured() => Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.clone(),
                model: model.clone(),
            }),
            _ => Err(Error::Config(
                "Prompt assistant needs a base URL, API key and model".to_string(),
            )),
        }
    }

    fn build_request(&self, source: &str, mode: PolishMode) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompts::POLISH_SYSTEM.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: mode.user_instruction(source),
                },
            ],
            stream: true,
        }
    }

    /// Start a streaming completion. Must be called inside a tokio runtime.
    pub fn polish(&self, source: &str, mode: PolishMode) -> PolishStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(PolishState::Idle);
        let state = Arc::new(state);

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&self.build_request(source, mode));

        tracing::info!("Polishing prompt ({} mode) with {}", mode, self.model);
        let task = tokio::spawn(run_stream(request, tx, cancel.clone(), state.clone()));

        PolishStream {
            events: rx,
            cancel,
            state,
            task,
        }
    }
}

/// Move to `next` unless a terminal state was already reached.
fn transition(state: &watch::Sender<PolishState>, next: PolishState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

async fn fail(
    tx: &mpsc::Sender<StreamEvent>,
    state: &watch::Sender<PolishState>,
    message: String,
) {
    tracing::error!("Prompt polish stream failed: {}", message);
    if transition(state, PolishState::Errored) {
        let _ = tx.send(StreamEvent::Error(message)).await;
    }
}

async fn run_stream(
    request: reqwest::RequestBuilder,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PolishState>>,
) {
    transition(&state, PolishState::Streaming);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        response = request.send() => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(e) => return fail(&tx, &state, format!("Request failed: {}", e)).await,
    };

    let status = response.status();
    if !status.is_success() {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            body = response.text() => body.unwrap_or_default(),
        };
        let message = format!("HTTP {}: {}", status.as_u16(), body_snippet(&body));
        return fail(&tx, &state, message).await;
    }

    let mut body = response.bytes_stream();
    let mut buffer = SseLineBuffer::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Prompt polish stream cancelled");
                return;
            }
            chunk = body.next() => chunk,
        };

        let lines = match chunk {
            Some(Ok(bytes)) => buffer.push(&bytes),
            Some(Err(e)) => return fail(&tx, &state, format!("Stream read failed: {}", e)).await,
            None => {
                let trailing = buffer.finish().and_then(|line| parse_line(&line));
                if let Some(event) = trailing {
                    if event != StreamEvent::Completed {
                        let _ = tx.send(event).await;
                    }
                }
                // The server closed the body without a [DONE] sentinel.
                if transition(&state, PolishState::Completed) {
                    let _ = tx.send(StreamEvent::Completed).await;
                }
                return;
            }
        };

        for line in lines {
            match parse_line(&line) {
                Some(StreamEvent::Completed) => {
                    if transition(&state, PolishState::Completed) {
                        let _ = tx.send(StreamEvent::Completed).await;
                    }
                    return;
                }
                Some(event) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                None => {}
            }
        }
    }
}

/// A live polish response. Dropping it cancels the request.
pub struct PolishStream {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<PolishState>>,
    task: JoinHandle<()>,
}

impl PolishStream {
    /// The next event, or `None` once the stream has ended or was cancelled.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Abort the request; the connection is dropped and no further events are delivered.
    pub fn cancel(&self) {
        if transition(&self.state, PolishState::Cancelled) {
            tracing::info!("Cancelling prompt polish stream");
        }
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn state(&self) -> PolishState {
        *self.state.borrow()
    }

    /// Whether the reader task, and with it the HTTP response, is gone.
    #[cfg(test)]
    fn reader_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Drain the stream into the concatenated text, stopping at the first error.
    pub async fn collect_text(&mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Chunk(chunk) => text.push_str(&chunk),
                StreamEvent::Completed => break,
                StreamEvent::Error(message) if self.state() == PolishState::Errored => {
                    return Err(Error::Decode(message));
                }
                StreamEvent::Error(message) => {
                    tracing::warn!("Ignoring malformed polish line: {}", message);
                }
            }
        }
        if self.state() == PolishState::Cancelled {
            return Err(Error::Cancelled);
        }
        Ok(text)
    }
}

impl Drop for PolishStream {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            self.cancel();
        }
    }
}
