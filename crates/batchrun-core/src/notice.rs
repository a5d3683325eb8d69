use crate::task::TaskId;
use crate::validate::ValidationErrors;

/// User-facing notifications published by the runner.
///
/// Subscribers are scoped to one [`BatchRunner`](crate::BatchRunner).
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A submission was rejected; every row error in one notice.
    ValidationFailed { errors: ValidationErrors },
    /// Debug mode could not be enabled, so the batch did not start.
    DebugEnableFailed { message: String },
    /// A task stream reported an error.
    TaskFailed { id: TaskId, message: String },
    /// The endpoint timed out on its side; the task list should be reloaded.
    RefreshRequested,
    /// The automatic sequence reached the last task.
    RunFinished { ok_count: usize, fail_count: usize },
}
