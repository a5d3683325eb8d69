//! Common imports for client usage.
pub use crate::{
    ClientError, DebugControl, DebugStatus, HttpClientConfig, HttpWorkflowClient, RunLogEntry,
    RunLogSink, SubmitTarget, TaskRequest, TaskStreamClient, TaskStreamEvent, TaskStreamHandle,
};
