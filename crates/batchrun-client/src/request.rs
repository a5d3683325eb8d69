use std::fmt;

use serde::{Deserialize, Serialize};

/// What a batch task is submitted against: the whole workflow or one node of
/// it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitTarget {
    /// Run the whole workflow/app once per task.
    Workflow { workflow_id: String, name: String },
    /// Run a single node of the workflow once per task.
    Node {
        workflow_id: String,
        name: String,
        node_id: String,
        node_name: String,
    },
}

impl SubmitTarget {
    /// Creates a whole-workflow target.
    pub fn workflow(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Workflow {
            workflow_id: workflow_id.into(),
            name: name.into(),
        }
    }

    /// Creates a single-node target.
    pub fn node(
        workflow_id: impl Into<String>,
        name: impl Into<String>,
        node_id: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self::Node {
            workflow_id: workflow_id.into(),
            name: name.into(),
            node_id: node_id.into(),
            node_name: node_name.into(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Workflow { workflow_id, .. } | Self::Node { workflow_id, .. } => workflow_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Workflow { name, .. } | Self::Node { name, .. } => name,
        }
    }

    /// Node name for single-node targets.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Workflow { .. } => None,
            Self::Node { node_name, .. } => Some(node_name),
        }
    }
}

impl fmt::Display for SubmitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow { workflow_id, .. } => write!(f, "workflow {workflow_id}"),
            Self::Node {
                workflow_id,
                node_id,
                ..
            } => write!(f, "workflow {workflow_id} node {node_id}"),
        }
    }
}

/// One task submission: the task's inputs plus its position in the batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub target: SubmitTarget,
    /// Input values keyed by slot name.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// 1-based task id within the batch.
    pub batch_index: u32,
    pub batch_total: u32,
}

/// Debugging state reported by the endpoint before a batch is submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugStatus {
    pub enabled: bool,
}

/// Summary sent to the run-log endpoint when an automatic run reaches its
/// last task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub workflow_id: String,
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub ok_count: usize,
    pub fail_count: usize,
}
