use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Tasks optimistically marked running at submission. Dispatch is still
    /// one task at a time.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Hard per-task timeout in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Finished runs kept per workflow in the history log.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Buffer of the notice broadcast channel.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

const fn default_group_size() -> usize {
    1
}

const fn default_task_timeout_ms() -> u64 {
    4 * 60 * 1_000
}

const fn default_history_limit() -> usize {
    10
}

const fn default_notice_capacity() -> usize {
    64
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
            task_timeout_ms: default_task_timeout_ms(),
            history_limit: default_history_limit(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

impl BatchConfig {
    /// Defaults overridden by `BATCHRUN_GROUP_SIZE`, `BATCHRUN_TASK_TIMEOUT_MS`
    /// and `BATCHRUN_HISTORY_LIMIT`. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_number::<usize>("BATCHRUN_GROUP_SIZE") {
            config.group_size = v;
        }
        if let Some(v) = env_number::<u64>("BATCHRUN_TASK_TIMEOUT_MS") {
            config.task_timeout_ms = v;
        }
        if let Some(v) = env_number::<usize>("BATCHRUN_HISTORY_LIMIT") {
            config.history_limit = v;
        }
        config
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.group_size == 0 {
            return Err(BatchError::Config("group_size must be at least 1".into()));
        }
        if self.task_timeout_ms == 0 {
            return Err(BatchError::Config(
                "task_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(BatchError::Config("history_limit must be at least 1".into()));
        }
        if self.notice_capacity == 0 {
            return Err(BatchError::Config(
                "notice_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
