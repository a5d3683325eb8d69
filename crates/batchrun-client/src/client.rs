use std::pin::Pin;

use futures::Stream;

use crate::errors::ClientError;
use crate::request::{DebugStatus, RunLogEntry, TaskRequest};
use crate::stream::TaskStreamEvent;

/// Boxed event stream returned by [`TaskStreamClient::open_stream`].
pub type TaskEventStream =
    Pin<Box<dyn Stream<Item = Result<TaskStreamEvent, ClientError>> + Send + 'static>>;

/// An open task stream.
pub struct TaskStreamHandle {
    pub stream: TaskEventStream,
}

impl TaskStreamHandle {
    pub fn new(stream: TaskEventStream) -> Self {
        Self { stream }
    }
}

/// Opens one streaming submission per task.
#[async_trait::async_trait]
pub trait TaskStreamClient: Send + Sync {
    async fn open_stream(&self, request: TaskRequest) -> Result<TaskStreamHandle, ClientError>;
}

/// Queries and toggles the debugging state a workflow must be in before a
/// batch can be submitted.
#[async_trait::async_trait]
pub trait DebugControl: Send + Sync {
    async fn debug_status(&self, workflow_id: &str) -> Result<DebugStatus, ClientError>;

    async fn enable_debug(&self, workflow_id: &str) -> Result<(), ClientError>;
}

/// Receives the final counts of a fully automatic run.
#[async_trait::async_trait]
pub trait RunLogSink: Send + Sync {
    async fn record_run(&self, entry: RunLogEntry) -> Result<(), ClientError>;
}
