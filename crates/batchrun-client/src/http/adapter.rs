use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::client::{DebugControl, RunLogSink, TaskStreamClient, TaskStreamHandle};
use crate::errors::ClientError;
use crate::request::{DebugStatus, RunLogEntry, SubmitTarget, TaskRequest};
use crate::stream::TaskStreamEvent;

use super::config::HttpClientConfig;
use super::transport::{SseDecoder, map_frame_to_event};

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Client for the console's workflow API: streaming task submission, the
/// debug-enable gate, and the batch run log.
#[derive(Clone)]
pub struct HttpWorkflowClient {
    client: reqwest::Client,
    config: HttpClientConfig,
}

impl HttpWorkflowClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, ClientError> {
        if config.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client from `BATCHRUN_API_BASE_URL` / `BATCHRUN_API_KEY`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(HttpClientConfig::from_env()?)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send_checked(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("{what} request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::api(
                format!("{what} failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl TaskStreamClient for HttpWorkflowClient {
    async fn open_stream(&self, request: TaskRequest) -> Result<TaskStreamHandle, ClientError> {
        let url = match &request.target {
            SubmitTarget::Workflow { workflow_id, .. } => {
                self.config.workflow_stream_url(workflow_id)
            }
            SubmitTarget::Node {
                workflow_id,
                node_id,
                ..
            } => self.config.node_stream_url(workflow_id, node_id),
        };
        debug!(
            target_kind = %request.target,
            batch_index = request.batch_index,
            batch_total = request.batch_total,
            "opening task stream"
        );
        let body = build_request_body(&request);
        let response = self
            .send_checked(
                self.client
                    .post(url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
                    .json(&body),
                "task stream",
            )
            .await?;

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(TaskStreamHandle::new(Box::pin(task_event_stream(
            bytes_stream,
        ))))
    }
}

#[async_trait::async_trait]
impl DebugControl for HttpWorkflowClient {
    async fn debug_status(&self, workflow_id: &str) -> Result<DebugStatus, ClientError> {
        let response = self
            .send_checked(
                self.client
                    .get(self.config.debug_status_url(workflow_id))
                    .timeout(self.config.timeout),
                "debug status",
            )
            .await?;
        response
            .json::<DebugStatus>()
            .await
            .map_err(|e| ClientError::protocol(format!("invalid debug status body: {e}")))
    }

    async fn enable_debug(&self, workflow_id: &str) -> Result<(), ClientError> {
        self.send_checked(
            self.client
                .post(self.config.debug_enable_url(workflow_id))
                .timeout(self.config.timeout),
            "debug enable",
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RunLogSink for HttpWorkflowClient {
    async fn record_run(&self, entry: RunLogEntry) -> Result<(), ClientError> {
        self.send_checked(
            self.client
                .post(self.config.run_log_url())
                .timeout(self.config.timeout)
                .json(&entry),
            "batch run log",
        )
        .await?;
        Ok(())
    }
}

pub(crate) fn build_request_body(request: &TaskRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "inputs": request.inputs,
        "workflow_id": request.target.workflow_id(),
        "batch_index": request.batch_index,
        "batch_total": request.batch_total,
        "stream": true,
    });
    if let SubmitTarget::Node { node_id, .. } = &request.target {
        body["node_id"] = serde_json::Value::String(node_id.clone());
    }
    body
}

fn task_event_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<TaskStreamEvent, ClientError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<TaskStreamEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            if let Some(event) = map_frame_to_event(&frame)? {
                                state.pending.push_back(event);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ClientError::transport(format!(
                            "task stream read failed: {e}"
                        )));
                    }
                    None => {
                        if let Some(frame) = state.decoder.finish()
                            && let Some(event) = map_frame_to_event(&frame)?
                        {
                            state.pending.push_back(event);
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: SubmitTarget) -> TaskRequest {
        let mut inputs = serde_json::Map::new();
        inputs.insert("question".into(), serde_json::json!("why?"));
        TaskRequest {
            target,
            inputs,
            batch_index: 2,
            batch_total: 5,
        }
    }

    #[test]
    fn workflow_body_carries_inputs_and_batch_position() {
        let body = build_request_body(&request(SubmitTarget::workflow("wf-1", "demo")));
        assert_eq!(body["inputs"]["question"], "why?");
        assert_eq!(body["batch_index"], 2);
        assert_eq!(body["batch_total"], 5);
        assert_eq!(body["workflow_id"], "wf-1");
        assert!(body.get("node_id").is_none());
    }

    #[test]
    fn node_body_carries_node_id() {
        let body = build_request_body(&request(SubmitTarget::node("wf-1", "demo", "n-3", "llm")));
        assert_eq!(body["node_id"], "n-3");
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            HttpWorkflowClient::new(HttpClientConfig::new("  ")),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn event_stream_decodes_frames_split_across_chunks() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"event: start\ndata: {\"message_id\":\"m\"}\n\nevent: chu")),
            Ok(bytes::Bytes::from_static(b"nk\ndata: {\"text\":\"a\"}\n\n")),
            Ok(bytes::Bytes::from_static(b"event: finish\ndata: {\"outputs\":\"a\"}")),
        ];
        let events: Vec<_> = task_event_stream(Box::pin(stream::iter(chunks)))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("events");
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TaskStreamEvent::Started { .. }));
        assert!(matches!(events[1], TaskStreamEvent::Chunk { .. }));
        assert!(events[2].is_terminal());
    }

    #[tokio::test]
    async fn progress_events_do_not_end_the_stream() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"event: start\ndata: {}\n\n")),
            Ok(bytes::Bytes::from_static(b"event: node_started\ndata: {\"node\":\"llm\"}\n\n")),
            Ok(bytes::Bytes::from_static(b"event: finish\ndata: {\"outputs\":\"done\"}\n\n")),
        ];
        let events: Vec<_> = task_event_stream(Box::pin(stream::iter(chunks)))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("events");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TaskStreamEvent::Started { .. }));
        assert_eq!(
            events[1],
            TaskStreamEvent::Finished {
                payload: serde_json::json!({"outputs": "done"})
            }
        );
    }
}
