//! One streaming dispatch of one task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use batchrun_client::{TaskRequest, TaskStreamClient, TaskStreamEvent};
use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::board::TaskBoard;
use crate::extract;
use crate::task::TaskId;

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Adapter-reported or transport failure, with the normalized message.
    Failed { message: String },
    /// No terminal event arrived within the task timeout.
    TimedOut,
    /// Another path already ended this dispatch; nothing was applied.
    Discarded,
}

/// Applies stream events of one dispatch to the board.
///
/// The first terminal transition (finish, failure or timeout) claims the
/// `ended` flag; every event applied after that is a no-op.
pub struct Dispatch {
    board: Arc<TaskBoard>,
    generation: u64,
    task_id: TaskId,
    ended: AtomicBool,
}

impl Dispatch {
    /// Marks the task running and loading, clearing any previous outcome.
    pub fn begin(board: Arc<TaskBoard>, generation: u64, task_id: TaskId) -> Self {
        board.patch(generation, task_id, |task| {
            task.begin_dispatch();
            true
        });
        Self {
            board,
            generation,
            task_id,
            ended: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.ended
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn on_start(&self, message_id: Option<String>) {
        self.board.patch(self.generation, self.task_id, |task| {
            if self.is_ended() {
                return false;
            }
            task.apply_start(message_id);
            true
        });
    }

    pub fn on_chunk(&self, payload: &serde_json::Value) {
        let text = extract::chunk_text(payload);
        let trace = extract::chunk_trace(payload);
        if text.is_empty() && trace.is_none() {
            return;
        }
        self.board.patch(self.generation, self.task_id, |task| {
            if self.is_ended() {
                return false;
            }
            task.append_chunk(&text, trace);
            true
        });
    }

    pub fn on_finish(&self, payload: &serde_json::Value) -> TaskOutcome {
        if let Some(error) = extract::finish_error(payload) {
            return self.on_failure(extract::error_message(error));
        }
        if !self.claim() {
            return TaskOutcome::Discarded;
        }
        let result = extract::finish_result(payload);
        let message_id = extract::finish_message_id(payload);
        self.board.patch(self.generation, self.task_id, |task| {
            task.complete(result.completion, result.mirror, message_id);
            true
        });
        TaskOutcome::Completed
    }

    pub fn on_failure(&self, message: String) -> TaskOutcome {
        if !self.claim() {
            return TaskOutcome::Discarded;
        }
        let error = message.clone();
        self.board.patch(self.generation, self.task_id, |task| {
            task.fail(Some(error));
            true
        });
        TaskOutcome::Failed { message }
    }

    pub fn on_timeout(&self) -> TaskOutcome {
        if !self.claim() {
            return TaskOutcome::Discarded;
        }
        self.board.patch(self.generation, self.task_id, |task| {
            task.fail(None);
            true
        });
        TaskOutcome::TimedOut
    }

    /// Opens the stream and applies its events until a terminal event, a
    /// stream failure, or the timeout, whichever comes first.
    pub async fn drive(
        &self,
        client: Arc<dyn TaskStreamClient>,
        request: TaskRequest,
        timeout: Duration,
    ) -> TaskOutcome {
        match tokio::time::timeout(timeout, self.consume(client, request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    task_id = self.task_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "task timed out"
                );
                self.on_timeout()
            }
        }
    }

    async fn consume(
        &self,
        client: Arc<dyn TaskStreamClient>,
        request: TaskRequest,
    ) -> TaskOutcome {
        let mut handle = match client.open_stream(request).await {
            Ok(handle) => handle,
            Err(err) => return self.on_failure(err.message().to_string()),
        };
        while let Some(next) = handle.stream.next().await {
            match next {
                Ok(TaskStreamEvent::Started { message_id }) => {
                    debug!(task_id = self.task_id, ?message_id, "task stream started");
                    self.on_start(message_id);
                }
                Ok(TaskStreamEvent::Chunk { payload }) => self.on_chunk(&payload),
                Ok(TaskStreamEvent::Finished { payload }) => return self.on_finish(&payload),
                Err(err) => return self.on_failure(err.message().to_string()),
            }
        }
        self.on_failure("stream ended without a finish event".into())
    }
}
