//! Task model: one validated input row bound to its streaming outcome.

use serde::{Deserialize, Serialize};

/// 1-based position of a task in its batch. The only key the runner uses.
pub type TaskId = u32;

/// Lifecycle of a task. Moves forward only, except that a retry puts a
/// failed task back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Marker of the stream view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Transient view state rebuilt from stream events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamState {
    pub phase: StreamPhase,
    /// Text accumulated from chunks (or mirrored from the final result).
    pub text: String,
    pub traces: Vec<serde_json::Value>,
    pub error: Option<String>,
    pub expanded: bool,
}

impl StreamState {
    fn running() -> Self {
        Self {
            phase: StreamPhase::Running,
            expanded: true,
            ..Self::default()
        }
    }
}

/// One validated input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    pub slot: String,
    /// Cell text as submitted (trimmed).
    pub raw: String,
    /// Value coerced to the slot's kind.
    pub value: serde_json::Value,
}

/// Validated inputs of one task in declared slot order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskParams(pub Vec<ParamValue>);

impl TaskParams {
    pub fn iter(&self) -> impl Iterator<Item = &ParamValue> {
        self.0.iter()
    }

    /// Submitted text for `slot`, if the slot is declared.
    pub fn raw(&self, slot: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.slot == slot)
            .map(|p| p.raw.as_str())
    }

    /// Request inputs keyed by slot name.
    pub fn to_inputs(&self) -> serde_json::Map<String, serde_json::Value> {
        self.0
            .iter()
            .map(|p| (p.slot.clone(), p.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub params: TaskParams,
    /// True while a stream is open for the task.
    pub loading: bool,
    /// Raw result payload once the task completed.
    pub completion: Option<serde_json::Value>,
    pub stream_state: StreamState,
    /// Correlation id assigned by the endpoint.
    pub message_id: Option<String>,
}

impl Task {
    /// Creates a task in its submission state: optimistically running (and
    /// loading) inside the initial group, pending otherwise.
    pub fn new(id: TaskId, params: TaskParams, in_initial_group: bool) -> Self {
        Self {
            id,
            status: if in_initial_group {
                TaskStatus::Running
            } else {
                TaskStatus::Pending
            },
            params,
            loading: in_initial_group,
            completion: None,
            stream_state: StreamState::default(),
            message_id: None,
        }
    }

    /// Listed in results once it left `Pending`.
    pub fn is_visible(&self) -> bool {
        self.status != TaskStatus::Pending
    }

    /// Result as exported: the completion of a completed task, verbatim when
    /// it is a string and JSON otherwise. Empty for every other status.
    pub fn result_text(&self) -> String {
        if self.status != TaskStatus::Completed {
            return String::new();
        }
        match &self.completion {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub(crate) fn begin_dispatch(&mut self) {
        self.status = TaskStatus::Running;
        self.loading = true;
        self.completion = None;
        self.message_id = None;
        self.stream_state = StreamState::default();
    }

    pub(crate) fn apply_start(&mut self, message_id: Option<String>) {
        self.stream_state = StreamState::running();
        if message_id.is_some() {
            self.message_id = message_id;
        }
    }

    pub(crate) fn append_chunk(&mut self, text: &str, trace: Option<serde_json::Value>) {
        if self.stream_state.phase == StreamPhase::Idle {
            self.stream_state.phase = StreamPhase::Running;
            self.stream_state.expanded = true;
        }
        if let Some(trace) = trace {
            self.stream_state.traces.push(trace);
        }
        self.stream_state.text.push_str(text);
    }

    pub(crate) fn complete(
        &mut self,
        completion: Option<serde_json::Value>,
        mirror: Option<String>,
        message_id: Option<String>,
    ) {
        self.status = TaskStatus::Completed;
        self.loading = false;
        self.completion = completion;
        if let Some(text) = mirror {
            self.stream_state.text = text;
        }
        self.stream_state.phase = StreamPhase::Succeeded;
        if message_id.is_some() {
            self.message_id = message_id;
        }
    }

    pub(crate) fn fail(&mut self, error: Option<String>) {
        self.status = TaskStatus::Failed;
        self.loading = false;
        self.stream_state.phase = StreamPhase::Failed;
        self.stream_state.error = error;
    }

    /// Returns an optimistically running task that was never dispatched to
    /// `Pending`.
    pub(crate) fn release(&mut self) -> bool {
        if self.status != TaskStatus::Running || !self.loading {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.loading = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TaskParams {
        TaskParams(vec![ParamValue {
            slot: "question".into(),
            raw: "why".into(),
            value: serde_json::json!("why"),
        }])
    }

    #[test]
    fn new_task_in_group_is_running_and_loading() {
        let t = Task::new(1, params(), true);
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.loading);
        let t = Task::new(2, params(), false);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(!t.loading);
        assert!(!t.is_visible());
    }

    #[test]
    fn release_only_touches_undispatched_running_tasks() {
        let mut t = Task::new(1, params(), true);
        assert!(t.release());
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(!t.loading);
        let mut done = Task::new(2, params(), true);
        done.fail(None);
        assert!(!done.release());
        assert_eq!(done.status, TaskStatus::Failed);
    }

    #[test]
    fn complete_mirrors_text_and_clears_loading() {
        let mut t = Task::new(1, params(), true);
        t.apply_start(Some("m-1".into()));
        t.append_chunk("partial", None);
        t.complete(Some(serde_json::json!("final")), Some("final".into()), None);
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(!t.loading);
        assert_eq!(t.stream_state.text, "final");
        assert_eq!(t.message_id.as_deref(), Some("m-1"));
        assert_eq!(t.result_text(), "final");
    }

    #[test]
    fn failed_task_exports_empty_result() {
        let mut t = Task::new(1, params(), true);
        t.completion = Some(serde_json::json!({"a": 1}));
        t.fail(Some("boom".into()));
        assert_eq!(t.result_text(), "");
        assert_eq!(t.stream_state.phase, StreamPhase::Failed);
    }

    #[test]
    fn structured_completion_exports_as_json() {
        let mut t = Task::new(1, params(), true);
        t.complete(Some(serde_json::json!({"a": 1, "b": 2})), None, None);
        assert_eq!(t.result_text(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn params_render_request_inputs() {
        let inputs = params().to_inputs();
        assert_eq!(inputs.get("question"), Some(&serde_json::json!("why")));
        assert_eq!(params().raw("question"), Some("why"));
        assert_eq!(params().raw("missing"), None);
    }
}
