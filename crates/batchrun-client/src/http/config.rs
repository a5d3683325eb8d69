use std::time::Duration;

use crate::errors::ClientError;

/// Configuration for [`HttpWorkflowClient`](super::HttpWorkflowClient).
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Base URL of the console API, without the `/api/v1` suffix.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Timeout for the non-streaming calls (debug status, enable, run log).
    ///
    /// Task streams are bounded by the orchestrator's own timeout instead.
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Creates a config with defaults for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `BATCHRUN_API_BASE_URL` and `BATCHRUN_API_KEY`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("BATCHRUN_API_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ClientError::Config(
                "missing BATCHRUN_API_BASE_URL for the workflow endpoint".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Ok(key) = std::env::var("BATCHRUN_API_KEY")
            && !key.trim().is_empty()
        {
            config.api_key = Some(key.trim().to_string());
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn api_root(&self) -> String {
        format!("{}/api/v1", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn workflow_stream_url(&self, workflow_id: &str) -> String {
        format!("{}/workflows/{workflow_id}/run/stream", self.api_root())
    }

    pub(crate) fn node_stream_url(&self, workflow_id: &str, node_id: &str) -> String {
        format!(
            "{}/workflows/{workflow_id}/nodes/{node_id}/run/stream",
            self.api_root()
        )
    }

    pub(crate) fn debug_status_url(&self, workflow_id: &str) -> String {
        format!("{}/workflows/{workflow_id}/debug", self.api_root())
    }

    pub(crate) fn debug_enable_url(&self, workflow_id: &str) -> String {
        format!("{}/workflows/{workflow_id}/debug/enable", self.api_root())
    }

    pub(crate) fn run_log_url(&self) -> String {
        format!("{}/workflows/batch-logs", self.api_root())
    }
}
