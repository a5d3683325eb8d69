//! Interpretation of raw stream payloads: chunk text, finish results and
//! error messages.

use serde_json::Value;

const CHUNK_TEXT_FIELDS: [&str; 3] = ["text", "content", "message"];
const ERROR_MESSAGE_FIELDS: [&str; 4] = ["simple_error", "detail_error", "message", "msg"];
const BOOKKEEPING_FIELDS: [&str; 4] = ["event", "message_id", "messageId", "id"];

/// Text carried by a chunk payload.
///
/// A string payload is used as is; otherwise the first non-empty string
/// among `text`, `content` and `message`; otherwise the payload as JSON.
/// Literal `\n` and `\t` escapes are unescaped. May be empty, also when the
/// text fields are present but all empty.
pub fn chunk_text(payload: &Value) -> String {
    let text = match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => {
            let fields: Vec<&str> = CHUNK_TEXT_FIELDS
                .iter()
                .filter_map(|key| other.get(*key).and_then(Value::as_str))
                .collect();
            match fields.iter().find(|s| !s.is_empty()) {
                Some(s) => (*s).to_string(),
                None if !fields.is_empty() => String::new(),
                None => other.to_string(),
            }
        }
    };
    unescape_whitespace(&text)
}

/// Trace entry attached to an object chunk, if any.
pub fn chunk_trace(payload: &Value) -> Option<Value> {
    payload.get("trace").filter(|v| !v.is_null()).cloned()
}

/// Replaces the two-character sequences `\n` and `\t` with the control
/// characters they stand for.
pub fn unescape_whitespace(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    text.replace("\\n", "\n").replace("\\t", "\t")
}

/// The `error` field of a finish payload, when set.
pub fn finish_error(payload: &Value) -> Option<&Value> {
    payload.get("error").filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        _ => true,
    })
}

/// Normalizes an error value for display: a string as is, else the first
/// string among `simple_error`, `detail_error`, `message` and `msg`, else
/// the value as JSON.
pub fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => ERROR_MESSAGE_FIELDS
            .iter()
            .find_map(|key| other.get(*key).and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// True for errors that mean the endpoint gave up waiting, which the console
/// recovers from by refreshing its task list.
pub fn is_request_timeout(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("request timeout") || lower.contains("timed out")
}

/// Result of a successful finish payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishResult {
    pub completion: Option<Value>,
    /// Text that replaces the accumulated buffer, when the result is a
    /// string or a single-key object holding a string.
    pub mirror: Option<String>,
}

/// Extracts the completion from a finish payload without an error.
///
/// The `outputs` field is the result when present; otherwise the payload
/// itself minus bookkeeping fields.
pub fn finish_result(payload: &Value) -> FinishResult {
    let completion = match payload.get("outputs") {
        Some(outputs) => Some(outputs.clone()),
        None => match payload {
            Value::Object(map) => {
                let rest: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| {
                        !BOOKKEEPING_FIELDS.contains(&k.as_str()) && k.as_str() != "error"
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (!rest.is_empty()).then_some(Value::Object(rest))
            }
            Value::Null => None,
            other => Some(other.clone()),
        },
    };
    let completion = completion.filter(|v| !v.is_null());

    let mirror = match &completion {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(map)) if map.len() == 1 => {
            map.values().next().and_then(Value::as_str).map(ToOwned::to_owned)
        }
        _ => None,
    };
    FinishResult { completion, mirror }
}

/// Correlation id carried by a finish payload.
pub fn finish_message_id(payload: &Value) -> Option<String> {
    ["message_id", "messageId"]
        .iter()
        .find_map(|key| payload.get(*key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}
