//! Durable event trail — append-only, capped, best-effort.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::store::ListStore;

/// One structured event. `ts` is an ISO 8601 UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Append-only event log in the durable store, newest kept, oldest evicted
/// past the cap. Appends never fail the operation being logged: every
/// storage error degrades to a `tracing::warn!`.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn ListStore>,
    key: String,
    max_entries: u64,
}

impl EventLog {
    pub fn new(store: Arc<dyn ListStore>, key: impl Into<String>, max_entries: u64) -> Self {
        Self {
            store,
            key: key.into(),
            max_entries,
        }
    }

    /// Append an event, best-effort.
    pub async fn emit(&self, kind: &str, data: serde_json::Value) {
        let entry = LogEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            kind: kind.to_string(),
            data,
        };
        let Ok(raw) = serde_json::to_string(&entry) else {
            tracing::warn!(kind, "Failed to serialize log entry");
            return;
        };
        if let Err(e) = self.store.push_tail(&self.key, &raw).await {
            tracing::warn!(kind, error = %e, "Failed to append log entry");
            return;
        }
        // Keep the list bounded; a failed trim only delays eviction.
        if let Err(e) = self.store.trim(&self.key, -(self.max_entries as i64), -1).await {
            tracing::warn!(error = %e, "Failed to trim log");
        }
    }

    /// Most recent entries, newest first. Unreadable records come back as
    /// `parse_error` placeholders rather than being dropped.
    pub async fn recent(&self, limit: u64) -> Result<Vec<LogEntry>, StorageError> {
        let limit = limit.min(self.max_entries).max(1) as i64;
        let mut raw = self.store.range(&self.key, -limit, -1).await?;
        raw.reverse();
        Ok(raw
            .into_iter()
            .map(|s| {
                serde_json::from_str(&s).unwrap_or_else(|_| LogEntry {
                    ts: String::new(),
                    kind: "parse_error".into(),
                    data: serde_json::json!({ "raw": s }),
                })
            })
            .collect())
    }
}
