use crate::task::TaskId;
use crate::validate::ValidationErrors;

/// Errors returned by [`BatchRunner`](crate::BatchRunner) operations.
///
/// Task-level failures are not errors here; they land on the task itself and
/// on the notice channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    /// One or more input rows failed validation; nothing was submitted.
    #[error(transparent)]
    Validation(ValidationErrors),
    /// A previous batch still has tasks waiting or streaming, or another
    /// submission is in progress (`pending` is 0 while that one is still
    /// validating or passing the debug gate).
    #[error("a batch is still running ({pending} task(s) not finished)")]
    Busy { pending: usize },
    /// Debug mode was off and could not be enabled.
    #[error("debug mode could not be enabled: {0}")]
    DebugGate(String),
    #[error("task {0} not found in the current batch")]
    UnknownTask(TaskId),
    /// The task already has an open stream.
    #[error("task {0} is already streaming")]
    TaskInFlight(TaskId),
    #[error("no batch has been submitted")]
    NoBatch,
    #[error("config error: {0}")]
    Config(String),
    #[error("history error: {0}")]
    History(String),
}

impl From<ValidationErrors> for BatchError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}
