/// Errors returned by a task stream client before or while a stream is
/// consumed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The endpoint answered with an application-level failure (HTTP status,
    /// auth, unknown workflow).
    #[error("api error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The response shape or event sequencing was invalid.
    #[error("protocol error: {message}")]
    Protocol { message: String },
    /// The client itself is misconfigured.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Creates an API-level error.
    pub fn api(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Api {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message, .. }
            | Self::Transport { message }
            | Self::Protocol { message }
            | Self::Config(message) => message,
        }
    }

    /// Returns the HTTP status attached to an API error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => *status_code,
            _ => None,
        }
    }
}
