//! Polling state machine for DashScope asynchronous tasks.
//!
//! `TaskPhase::advance` is pure: it folds one observed task status into the next
//! phase, so the attempt and deadline policy can be tested without a server.
//! `TaskPoller` drives it against the task-status endpoint with a cancellable wait.

use super::types::{TaskOutput, TaskResponse, TaskResultItem, TaskStatus};
use crate::ai::http::BearerHttpClient;
use crate::models::Provider;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before each status query.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Overall budget measured from submission.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 60,
            timeout: Duration::from_secs(300),
        }
    }
}

/// A server-side generation job as last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub result_items: Vec<TaskResultItem>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl From<TaskOutput> for VendorTask {
    fn from(output: TaskOutput) -> Self {
        Self {
            task_id: output.task_id,
            status: output.task_status,
            result_items: output.results,
            error_code: output.code,
            error_message: output.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTerminal {
    Succeeded(VendorTask),
    Failed { code: String, message: String },
    Exhausted { task_id: String, attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPhase {
    Submitted {
        task_id: String,
        deadline: Instant,
    },
    Polling {
        task_id: String,
        attempt: u32,
        deadline: Instant,
    },
    Terminal(TaskTerminal),
}

impl TaskPhase {
    pub fn submitted(task_id: String, policy: &PollPolicy, now: Instant) -> Self {
        TaskPhase::Submitted {
            task_id,
            deadline: now + policy.timeout,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskPhase::Submitted { task_id, .. } | TaskPhase::Polling { task_id, .. } => {
                Some(task_id)
            }
            TaskPhase::Terminal(_) => None,
        }
    }

    /// Fold one status observation into the next phase.
    pub fn advance(self, observed: VendorTask, policy: &PollPolicy, now: Instant) -> Self {
        let (task_id, attempt, deadline) = match self {
            TaskPhase::Terminal(_) => return self,
            TaskPhase::Submitted { task_id, deadline } => (task_id, 1, deadline),
            TaskPhase::Polling {
                task_id,
                attempt,
                deadline,
            } => (task_id, attempt + 1, deadline),
        };

        match observed.status {
            TaskStatus::Succeeded => TaskPhase::Terminal(TaskTerminal::Succeeded(observed)),
            TaskStatus::Failed | TaskStatus::Canceled | TaskStatus::Unknown => {
                TaskPhase::Terminal(TaskTerminal::Failed {
                    code: observed
                        .error_code
                        .unwrap_or_else(|| format!("{:?}", observed.status).to_uppercase()),
                    message: observed
                        .error_message
                        .unwrap_or_else(|| "Task did not succeed".to_string()),
                })
            }
            TaskStatus::Pending | TaskStatus::Running => {
                if attempt >= policy.max_attempts || now >= deadline {
                    TaskPhase::Terminal(TaskTerminal::Exhausted {
                        task_id,
                        attempts: attempt,
                    })
                } else {
                    TaskPhase::Polling {
                        task_id,
                        attempt,
                        deadline,
                    }
                }
            }
        }
    }
}

pub struct TaskPoller<'a> {
    http: &'a BearerHttpClient,
    policy: PollPolicy,
}

impl<'a> TaskPoller<'a> {
    pub fn new(http: &'a BearerHttpClient, policy: PollPolicy) -> Self {
        Self { http, policy }
    }

    pub async fn fetch(&self, task_id: &str) -> Result<VendorTask> {
        let response: TaskResponse = self.http.get(&format!("tasks/{}", task_id)).await?;
        match response.output {
            Some(output) => Ok(output.into()),
            None => Err(Error::Vendor {
                provider: Provider::Qwen,
                code: response.code.unwrap_or_else(|| "NoOutput".to_string()),
                message: response
                    .message
                    .unwrap_or_else(|| format!("Task {} returned no output", task_id)),
            }),
        }
    }

    /// Poll until the task reaches a terminal phase or `cancel` fires.
    pub async fn run(&self, task_id: String, cancel: &CancellationToken) -> Result<TaskTerminal> {
        let mut phase = TaskPhase::submitted(task_id, &self.policy, Instant::now());

        loop {
            let task_id = match &phase {
                TaskPhase::Terminal(terminal) => return Ok(terminal.clone()),
                other => other.task_id().unwrap_or_default().to_string(),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Polling for Qwen task {} cancelled", task_id);
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                observed = self.fetch(&task_id) => observed?,
            };
            tracing::debug!("Qwen task {} status: {:?}", task_id, observed.status);

            phase = phase.advance(observed, &self.policy, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn observed(status: TaskStatus) -> VendorTask {
        VendorTask {
            task_id: "t-1".to_string(),
            status,
            result_items: Vec::new(),
            error_code: None,
            error_message: None,
        }
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(5),
            max_attempts: 10,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_advance_counts_attempts_while_running() {
        let policy = fast_policy();
        let now = Instant::now();
        let phase = TaskPhase::submitted("t-1".to_string(), &policy, now)
            .advance(observed(TaskStatus::Pending), &policy, now)
            .advance(observed(TaskStatus::Running), &policy, now);

        assert_eq!(
            phase,
            TaskPhase::Polling {
                task_id: "t-1".to_string(),
                attempt: 2,
                deadline: now + policy.timeout,
            }
        );
    }

    #[test]
    fn test_advance_exhausts_after_max_attempts() {
        let policy = PollPolicy {
            max_attempts: 2,
            ..fast_policy()
        };
        let now = Instant::now();
        let phase = TaskPhase::submitted("t-1".to_string(), &policy, now)
            .advance(observed(TaskStatus::Pending), &policy, now)
            .advance(observed(TaskStatus::Pending), &policy, now);

        assert_eq!(
            phase,
            TaskPhase::Terminal(TaskTerminal::Exhausted {
                task_id: "t-1".to_string(),
                attempts: 2
            })
        );
    }

    #[test]
    fn test_advance_exhausts_after_deadline() {
        let policy = fast_policy();
        let start = Instant::now();
        let phase = TaskPhase::submitted("t-1".to_string(), &policy, start).advance(
            observed(TaskStatus::Running),
            &policy,
            start + policy.timeout,
        );

        assert!(matches!(
            phase,
            TaskPhase::Terminal(TaskTerminal::Exhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_advance_failed_carries_vendor_error() {
        let policy = fast_policy();
        let now = Instant::now();
        let mut failed = observed(TaskStatus::Failed);
        failed.error_code = Some("DataInspectionFailed".to_string());
        failed.error_message = Some("Input data may contain inappropriate content.".to_string());

        let phase =
            TaskPhase::submitted("t-1".to_string(), &policy, now).advance(failed, &policy, now);

        assert_eq!(
            phase,
            TaskPhase::Terminal(TaskTerminal::Failed {
                code: "DataInspectionFailed".to_string(),
                message: "Input data may contain inappropriate content.".to_string(),
            })
        );
    }

    #[test]
    fn test_terminal_phase_ignores_further_observations() {
        let policy = fast_policy();
        let now = Instant::now();
        let terminal = TaskPhase::Terminal(TaskTerminal::Succeeded(observed(TaskStatus::Succeeded)));
        assert_eq!(
            terminal
                .clone()
                .advance(observed(TaskStatus::Failed), &policy, now),
            terminal
        );
    }

    fn task_body(status: &str) -> serde_json::Value {
        serde_json::json!({
            "request_id": "req",
            "output": { "task_id": "t-1", "task_status": status }
        })
    }

    #[tokio::test]
    async fn test_run_polls_until_succeeded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_body("RUNNING")))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {
                    "task_id": "t-1",
                    "task_status": "SUCCEEDED",
                    "results": [{ "url": "https://dashscope.example.com/1.png" }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = BearerHttpClient::new(
            Provider::Qwen,
            "key".to_string(),
            server.uri(),
            reqwest::Client::new(),
        );
        let terminal = TaskPoller::new(&http, fast_policy())
            .run("t-1".to_string(), &CancellationToken::new())
            .await
            .unwrap();

        match terminal {
            TaskTerminal::Succeeded(task) => assert_eq!(
                task.result_items[0].url.as_deref(),
                Some("https://dashscope.example.com/1.png")
            ),
            other => panic!("unexpected terminal {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let server = MockServer::start().await;
        let http = BearerHttpClient::new(
            Provider::Qwen,
            "key".to_string(),
            server.uri(),
            reqwest::Client::new(),
        );
        let policy = PollPolicy {
            interval: Duration::from_secs(3600),
            ..fast_policy()
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            TaskPoller::new(&http, policy).run("t-1".to_string(), &cancel),
        )
        .await
        .expect("cancellation should end the wait promptly");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_output_is_vendor_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "InvalidParameter",
                "message": "task not found"
            })))
            .mount(&server)
            .await;

        let http = BearerHttpClient::new(
            Provider::Qwen,
            "key".to_string(),
            server.uri(),
            reqwest::Client::new(),
        );
        let err = TaskPoller::new(&http, fast_policy())
            .fetch("t-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Vendor { ref code, .. } if code == "InvalidParameter"));
    }
}
