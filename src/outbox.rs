//! Outbox — durable catalog of successfully sent replies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::store::ListStore;

/// Immutable record of one sent message. Created only on successful send,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Mailer-assigned message id.
    pub id: String,
    /// ISO 8601 UTC send time.
    pub sent_at: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    /// Name of the matched section, if any.
    #[serde(default)]
    pub section: Option<String>,
    /// Free-form metadata, e.g. the originating job id.
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// One page of outbox entries, newest first.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxPage {
    pub items: Vec<OutboxEntry>,
    /// Offset plus page size; exact totals would cost an extra length call.
    pub total_approx: u64,
}

/// Append-only sent-mail catalog with oldest-first eviction past the cap.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn ListStore>,
    key: String,
    max_entries: u64,
}

impl Outbox {
    pub fn new(store: Arc<dyn ListStore>, key: impl Into<String>, max_entries: u64) -> Self {
        Self {
            store,
            key: key.into(),
            max_entries,
        }
    }

    /// Append one entry and evict past the cap. The caller decides what a
    /// failure means; the worker keeps it off the send path.
    pub async fn record(&self, entry: &OutboxEntry) -> Result<(), StorageError> {
        let raw =
            serde_json::to_string(entry).map_err(|e| StorageError::Malformed(e.to_string()))?;
        self.store.push_tail(&self.key, &raw).await?;
        self.store.trim(&self.key, -(self.max_entries as i64), -1).await
    }

    /// Page through entries newest-first. Unreadable records are skipped.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<OutboxPage, StorageError> {
        let limit = limit.max(1);
        let start = -((offset + limit) as i64);
        let stop = -(offset as i64) - 1;
        let mut raw = self.store.range(&self.key, start, stop).await?;
        raw.reverse();
        let items: Vec<OutboxEntry> =
            raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect();
        let total_approx = offset + items.len() as u64;
        Ok(OutboxPage { items, total_approx })
    }
}
