//! Views derived from a task list. Nothing here is stored; every value is
//! recomputed from the snapshot it is given.

use serde::Serialize;

use crate::task::{Task, TaskId, TaskStatus};
use crate::validate::InputSlot;

/// Header of the synthesized result column in exports.
pub const RESULT_COLUMN: &str = "result";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub ok_count: usize,
    pub fail_count: usize,
}

impl BatchSummary {
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.pending == 0 && self.running == 0
    }
}

pub fn summarize(tasks: &[Task]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: tasks.len(),
        ..BatchSummary::default()
    };
    for task in tasks {
        match task.status {
            TaskStatus::Pending => summary.pending += 1,
            TaskStatus::Running => summary.running += 1,
            TaskStatus::Completed => summary.ok_count += 1,
            TaskStatus::Failed => summary.fail_count += 1,
        }
    }
    summary
}

/// Tasks still waiting; a new submission is held back while any exist.
pub fn pending_ids(tasks: &[Task]) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| t.id)
        .collect()
}

/// Tasks shown in the results list.
pub fn visible_tasks(tasks: &[Task]) -> Vec<&Task> {
    tasks.iter().filter(|t| t.is_visible()).collect()
}

pub fn failed_count(tasks: &[Task]) -> usize {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count()
}

/// Whether the results banner and export are offered.
pub fn has_results(tasks: &[Task]) -> bool {
    tasks.iter().any(Task::is_visible)
}

/// Tabular export of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    /// Cells of one column, in row order.
    pub fn column(&self, index: usize) -> Vec<&str> {
        self.rows
            .iter()
            .map(|row| row.get(index).map(String::as_str).unwrap_or_default())
            .collect()
    }
}

/// One row per task regardless of status: the submitted value of each slot,
/// then the stringified result (empty unless the task completed).
pub fn export_table(slots: &[InputSlot], tasks: &[Task]) -> ExportTable {
    let mut header: Vec<String> = slots.iter().map(|s| s.name.clone()).collect();
    header.push(RESULT_COLUMN.to_string());
    let rows = tasks
        .iter()
        .map(|task| {
            let mut row: Vec<String> = slots
                .iter()
                .map(|slot| task.params.raw(&slot.name).unwrap_or_default().to_string())
                .collect();
            row.push(task.result_text());
            row
        })
        .collect();
    ExportTable { header, rows }
}
