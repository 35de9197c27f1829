//! Responder settings — stored JSON with sane defaults.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::store::ListStore;

/// A keyword-triggered section: alters reply instructions and/or delay when
/// a submission matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-section override of the default send delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
}

/// Process-wide responder configuration, editable at runtime through the
/// admin API. Stored JSON uses camelCase keys. Missing fields take the
/// defaults below, so partial saves merge instead of clobbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enable_auto_responder: bool,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub owner_email: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub system_instructions: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Per-message delay in seconds when no section-specific delay applies.
    #[serde(default)]
    pub default_delay_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_subject() -> String {
    "Thank you for reaching out".to_string()
}

fn default_tone() -> String {
    "friendly, concise, professional".to_string()
}

fn default_max_sentences() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_auto_responder: true,
            subject: default_subject(),
            signature: String::new(),
            tone: default_tone(),
            max_sentences: default_max_sentences(),
            from_email: String::new(),
            owner_email: String::new(),
            business_name: String::new(),
            system_instructions: String::new(),
            sections: Vec::new(),
            default_delay_seconds: 0,
        }
    }
}

/// Loads and saves the settings snapshot in the KV half of the store.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn ListStore>,
    key: String,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn ListStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Load the current settings. Absent or unreadable stored JSON degrades
    /// to defaults; transport failures propagate.
    pub async fn load(&self) -> Result<Settings, StorageError> {
        match self.store.get_value(&self.key).await? {
            None => Ok(Settings::default()),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    tracing::warn!(error = %e, "Stored settings unreadable, using defaults");
                    Ok(Settings::default())
                }
            },
        }
    }

    /// Persist the full settings aggregate.
    pub async fn save(&self, settings: &Settings) -> Result<(), StorageError> {
        let raw =
            serde_json::to_string(settings).map_err(|e| StorageError::Malformed(e.to_string()))?;
        self.store.set_value(&self.key, &raw).await
    }
}
