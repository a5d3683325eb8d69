//! Bounded per-workflow log of finished runs.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BatchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: Uuid,
    pub at: DateTime<Utc>,
    pub rows: usize,
    pub ok_count: usize,
    pub fail_count: usize,
}

/// Keyed append-log; each key keeps its `limit` most recent entries and
/// evicts the oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    limit: usize,
    entries: BTreeMap<String, VecDeque<HistoryEntry>>,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: BTreeMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn push(&mut self, key: &str, entry: HistoryEntry) {
        let list = self.entries.entry(key.to_string()).or_default();
        list.push_back(entry);
        while list.len() > self.limit {
            list.pop_front();
        }
    }

    /// Entries for `key`, newest first.
    pub fn entries(&self, key: &str) -> Vec<&HistoryEntry> {
        self.entries
            .get(key)
            .map(|list| list.iter().rev().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Loads a log written by [`save`](Self::save). A missing file yields an
    /// empty log with `limit`; a stored log keeps its entries but adopts
    /// `limit`.
    pub fn load(path: &Path, limit: usize) -> Result<Self, BatchError> {
        let mut log = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<HistoryLog>(&raw).map_err(|e| {
                BatchError::History(format!("invalid history file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(limit),
            Err(e) => {
                return Err(BatchError::History(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };
        log.limit = limit.max(1);
        for list in log.entries.values_mut() {
            while list.len() > log.limit {
                list.pop_front();
            }
        }
        Ok(log)
    }

    pub fn save(&self, path: &Path) -> Result<(), BatchError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BatchError::History(format!("create_dir_all: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| BatchError::History(format!("serialize history: {e}")))?;
        std::fs::write(path, raw)
            .map_err(|e| BatchError::History(format!("write {}: {e}", path.display())))
    }
}
