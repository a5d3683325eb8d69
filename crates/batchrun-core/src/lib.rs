pub mod aggregate;
pub mod board;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod history;
pub mod notice;
pub mod observability;
pub mod runner;
pub mod task;
pub mod validate;

// Minimal user-facing API: BatchRunner, BatchConfig, Task, InputSlot, Notice, BatchError.
pub use aggregate::{BatchSummary, ExportTable, RESULT_COLUMN};
pub use board::BatchSnapshot;
pub use config::BatchConfig;
pub use dispatch::TaskOutcome;
pub use error::BatchError;
pub use history::{HistoryEntry, HistoryLog};
pub use notice::Notice;
pub use observability::{LogSettings, init_observability, init_with, task_span};
pub use runner::{BatchRunner, BatchRunnerBuilder, RunReport};
pub use task::{StreamPhase, StreamState, Task, TaskId, TaskParams, TaskStatus};
pub use validate::{InputSlot, RowError, SlotKind, ValidationErrors, validate_rows};
