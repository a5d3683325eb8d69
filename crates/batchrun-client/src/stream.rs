/// Lifecycle events emitted by one task stream.
///
/// Payloads are kept as raw JSON; interpreting them is left to the
/// orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskStreamEvent {
    /// Optional first event; carries the correlation id when the endpoint
    /// assigns one up front.
    Started { message_id: Option<String> },
    /// Incremental partial output.
    Chunk { payload: serde_json::Value },
    /// Terminal event carrying either an `error` or an `outputs` field.
    Finished { payload: serde_json::Value },
}

impl TaskStreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}
