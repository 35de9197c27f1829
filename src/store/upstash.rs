//! Upstash Redis REST backend.
//!
//! Every command is a GET to `{base}/{cmd}/{arg}/...` with a bearer token;
//! the body is `{"result": ...}` where the result type depends on the
//! command (integer for RPUSH/LLEN, string or null for LPOP/GET, array for
//! LRANGE, "OK" for SET/LTRIM).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::StorageError;

use super::ListStore;

/// Connection settings for the Upstash REST endpoint.
#[derive(Debug, Clone)]
pub struct UpstashConfig {
    pub base_url: String,
    pub token: SecretString,
}

/// `ListStore` backed by the Upstash Redis REST API.
pub struct UpstashStore {
    http: reqwest::Client,
    base: reqwest::Url,
    token: SecretString,
}

#[derive(Deserialize)]
struct Reply {
    result: serde_json::Value,
}

impl UpstashStore {
    pub fn new(config: &UpstashConfig) -> Result<Self, StorageError> {
        let base = reqwest::Url::parse(&config.base_url)
            .map_err(|e| StorageError::Request(format!("invalid store URL: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: config.token.clone(),
        })
    }

    async fn call(&self, parts: &[&str]) -> Result<serde_json::Value, StorageError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Request("store URL cannot be a base".into()))?
            .extend(parts);

        let response = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let reply: Reply = response
            .json()
            .await
            .map_err(|e| StorageError::Malformed(e.to_string()))?;
        Ok(reply.result)
    }
}

fn expect_string(result: serde_json::Value) -> Result<Option<String>, StorageError> {
    match result {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        other => Err(StorageError::Malformed(format!(
            "expected string result, got {other}"
        ))),
    }
}

#[async_trait]
impl ListStore for UpstashStore {
    async fn push_tail(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.call(&["rpush", key, value]).await.map(|_| ())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>, StorageError> {
        expect_string(self.call(&["lpop", key]).await?)
    }

    async fn len(&self, key: &str) -> Result<u64, StorageError> {
        let result = self.call(&["llen", key]).await?;
        result
            .as_u64()
            .ok_or_else(|| StorageError::Malformed(format!("expected integer result, got {result}")))
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        let result = self
            .call(&["lrange", key, &start.to_string(), &stop.to_string()])
            .await?;
        let items = result
            .as_array()
            .ok_or_else(|| StorageError::Malformed(format!("expected array result, got {result}")))?;
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| StorageError::Malformed(format!("non-string list entry: {v}")))
            })
            .collect()
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        self.call(&["ltrim", key, &start.to_string(), &stop.to_string()])
            .await
            .map(|_| ())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        expect_string(self.call(&["get", key]).await?)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.call(&["set", key, value]).await.map(|_| ())
    }
}
