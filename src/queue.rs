//! Inbound job queue — FIFO over the durable list store.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StorageError;
use crate::store::ListStore;

/// One inbound submission awaiting a reply.
///
/// Stored JSON uses camelCase keys; records written by earlier deployments
/// keep deserializing. `form` is the submitted payload passed through
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Epoch milliseconds, set once at intake.
    pub received_at: i64,
    #[serde(default)]
    pub form: serde_json::Value,
}

impl Job {
    /// Create a job for a freshly received form payload.
    pub fn new(form: serde_json::Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: format!("{now}-{}", random_suffix(6)),
            received_at: now,
            form,
        }
    }

    /// String field from the form, empty if absent or non-string.
    pub fn field(&self, key: &str) -> &str {
        self.form.get(key).and_then(serde_json::Value::as_str).unwrap_or("")
    }
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// A record popped from the queue head.
#[derive(Debug)]
pub enum Popped {
    Job(Job),
    /// The raw payload failed to deserialize. The record is already consumed;
    /// the caller drops it and keeps draining.
    Malformed { raw: String },
}

/// FIFO wrapper over one list key in the durable store.
///
/// Ordering holds only with a single drainer; concurrent dequeuers pop
/// atomically but interleave.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn ListStore>,
    key: String,
}

impl JobQueue {
    pub fn new(store: Arc<dyn ListStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Append a job to the tail.
    pub async fn enqueue(&self, job: &Job) -> Result<(), StorageError> {
        let payload =
            serde_json::to_string(job).map_err(|e| StorageError::Malformed(e.to_string()))?;
        self.store.push_tail(&self.key, &payload).await
    }

    /// Pop the head of the queue. `Ok(None)` means the queue is empty.
    pub async fn dequeue(&self) -> Result<Option<Popped>, StorageError> {
        let Some(raw) = self.store.pop_head(&self.key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Job>(&raw) {
            Ok(job) => Ok(Some(Popped::Job(job))),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed queue record");
                Ok(Some(Popped::Malformed { raw }))
            }
        }
    }

    /// Current queue length.
    pub async fn len(&self) -> Result<u64, StorageError> {
        self.store.len(&self.key).await
    }
}
