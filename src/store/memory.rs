//! In-memory store — test double and non-durable dev fallback.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;

use super::ListStore;

/// In-process `ListStore` with Redis range/trim clamping semantics.
///
/// Not durable across restarts; production deployments configure the REST
/// store instead.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a Redis-style inclusive `(start, stop)` pair against a list of
/// `len` items. `None` means the range selects nothing.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start >= len || stop < start {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn push_tail(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut lists = self.lists.lock().unwrap();
        lists.entry(key.to_string()).or_default().push_back(value.to_string());
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut lists = self.lists.lock().unwrap();
        Ok(lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn len(&self, key: &str) -> Result<u64, StorageError> {
        let lists = self.lists.lock().unwrap();
        Ok(lists.get(key).map(VecDeque::len).unwrap_or(0) as u64)
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        let lists = self.lists.lock().unwrap();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        match resolve_range(list.len(), start, stop) {
            Some((start, stop)) => Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        let mut lists = self.lists.lock().unwrap();
        let Some(list) = lists.get_mut(key) else {
            return Ok(());
        };
        match resolve_range(list.len(), start, stop) {
            Some((start, stop)) => {
                let kept: VecDeque<String> =
                    list.iter().skip(start).take(stop - start + 1).cloned().collect();
                *list = kept;
            }
            None => list.clear(),
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap();
        Ok(values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_pop_fifo() {
        let store = MemoryStore::new();
        store.push_tail("q", "a").await.unwrap();
        store.push_tail("q", "b").await.unwrap();
        store.push_tail("q", "c").await.unwrap();

        assert_eq!(store.len("q").await.unwrap(), 3);
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.pop_head("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn range_negative_indices() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c", "d", "e"] {
            store.push_tail("l", v).await.unwrap();
        }

        // Last two entries
        assert_eq!(store.range("l", -2, -1).await.unwrap(), vec!["d", "e"]);
        // Start clamped to the head
        assert_eq!(store.range("l", -100, 1).await.unwrap(), vec!["a", "b"]);
        // Entirely before the head selects nothing
        assert!(store.range("l", -100, -20).await.unwrap().is_empty());
        // Whole list
        assert_eq!(store.range("l", 0, -1).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn range_empty_and_inverted() {
        let store = MemoryStore::new();
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());

        store.push_tail("l", "a").await.unwrap();
        assert!(store.range("l", 3, 5).await.unwrap().is_empty());
        assert!(store.range("l", 1, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trim_keeps_tail_window() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.push_tail("l", &i.to_string()).await.unwrap();
        }

        // Keep the newest three
        store.trim("l", -3, -1).await.unwrap();
        assert_eq!(store.range("l", 0, -1).await.unwrap(), vec!["7", "8", "9"]);
    }

    #[tokio::test]
    async fn trim_out_of_range_clears() {
        let store = MemoryStore::new();
        store.push_tail("l", "a").await.unwrap();
        store.trim("l", 5, 10).await.unwrap();
        assert_eq!(store.len("l").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn value_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_value("k").await.unwrap(), None);
        store.set_value("k", "v1").await.unwrap();
        store.set_value("k", "v2").await.unwrap();
        assert_eq!(store.get_value("k").await.unwrap().as_deref(), Some("v2"));
    }
}
