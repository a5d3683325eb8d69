//! Console rendering of task transitions and runner notices.

use std::collections::HashMap;

use batchrun_core::{BatchSnapshot, Notice, TaskId, TaskStatus};

/// Remembers the last printed status of every task so each transition is
/// reported once.
#[derive(Default)]
pub struct ProgressTracker {
    generation: u64,
    seen: HashMap<TaskId, TaskStatus>,
}

impl ProgressTracker {
    pub fn update(&mut self, snapshot: &BatchSnapshot) -> Vec<String> {
        if snapshot.generation != self.generation {
            self.generation = snapshot.generation;
            self.seen.clear();
        }
        let total = snapshot.tasks.len();
        let mut lines = Vec::new();
        for task in &snapshot.tasks {
            let previous = self.seen.insert(task.id, task.status);
            if previous == Some(task.status) {
                continue;
            }
            let detail = match task.status {
                TaskStatus::Pending => continue,
                TaskStatus::Running => "running".to_string(),
                TaskStatus::Completed => "completed".to_string(),
                TaskStatus::Failed => match &task.stream_state.error {
                    Some(error) => format!("failed: {error}"),
                    None => "failed (timed out)".to_string(),
                },
            };
            lines.push(format!("task {}/{} {}", task.id, total, detail));
        }
        lines
    }
}

pub fn format_notice(notice: &Notice) -> String {
    match notice {
        Notice::ValidationFailed { errors } => errors.to_string(),
        Notice::DebugEnableFailed { message } => {
            format!("could not enable debug mode: {message}")
        }
        Notice::TaskFailed { id, message } => format!("task {id} failed: {message}"),
        Notice::RefreshRequested => {
            "endpoint timed out; task list should be refreshed".to_string()
        }
        Notice::RunFinished {
            ok_count,
            fail_count,
        } => format!("run finished: {ok_count} succeeded, {fail_count} failed"),
    }
}
