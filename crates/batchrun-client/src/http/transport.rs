use tracing::debug;

use crate::errors::ClientError;
use crate::stream::TaskStreamEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame_bytes = self.buf[..idx].to_vec();
            self.buf.drain(..idx + delim_len);
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Maps one SSE frame to a task stream event.
///
/// The event kind comes from the `event:` line, or from an `event` field in
/// the JSON body, in which case the body's `data` field is the payload.
/// Frames without any kind are treated as chunks. Non-JSON data is passed
/// through as a JSON string.
pub(crate) fn map_frame_to_event(frame: &SseFrame) -> Result<Option<TaskStreamEvent>, ClientError> {
    let data = frame.data.trim();
    if frame.event.is_none() && (data.is_empty() || data == "[DONE]") {
        return Ok(None);
    }
    let mut payload = if data.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(data).unwrap_or_else(|_| serde_json::Value::String(data.to_string()))
    };

    let kind = match frame.event.clone() {
        Some(kind) => Some(kind),
        None => {
            let embedded = payload
                .get("event")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned);
            if embedded.is_some()
                && let Some(inner) = payload.get("data").cloned()
            {
                payload = inner;
            }
            embedded
        }
    };

    match kind.as_deref().map(str::trim) {
        Some("start" | "started" | "workflow_started") => Ok(Some(TaskStreamEvent::Started {
            message_id: extract_message_id(&payload),
        })),
        None | Some("chunk" | "message" | "delta") => {
            Ok(Some(TaskStreamEvent::Chunk { payload }))
        }
        Some("finish" | "finished" | "end" | "workflow_finished") => {
            Ok(Some(TaskStreamEvent::Finished { payload }))
        }
        Some("error") => {
            let payload = if payload.get("error").is_some() {
                payload
            } else {
                serde_json::json!({ "error": payload })
            };
            Ok(Some(TaskStreamEvent::Finished { payload }))
        }
        Some("ping" | "heartbeat") => Ok(None),
        // progress events (node_started, tracing, ...) carry nothing the task keeps
        Some(other) => {
            debug!(event = other, "skipping unrecognized stream event");
            Ok(None)
        }
    }
}

pub(crate) fn extract_message_id(payload: &serde_json::Value) -> Option<String> {
    ["message_id", "messageId", "id"]
        .iter()
        .find_map(|key| payload.get(*key))
        .and_then(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
