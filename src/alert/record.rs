//! Stable serialized form of an [`Alert`](super::Alert).
//!
//! The key names here are the persisted and scheduler-payload contract;
//! renaming a field breaks every state file already on disk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat record that fully reconstructs an alert, including its cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Next due instant, RFC 3339 with offset.
    pub next_expiration_time: String,
    /// Wire number of the [`AlertKind`](super::AlertKind).
    pub alert_type: i32,
    /// Priority 1-10.
    pub priority: u8,
    /// Seconds between occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_frequency: Option<u64>,
    /// Weekday numbers, Monday = 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_days: Option<Vec<u8>>,
    /// Last allowed occurrence, RFC 3339 with offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_repeat: Option<String>,
    pub alert_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_filename: Option<String>,
    /// Auxiliary keys; contains the alert id under `ident`.
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl AlertRecord {
    /// The alert id carried in the context, if present.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.context
            .get(super::ALERT_ID_KEY)
            .and_then(serde_json::Value::as_str)
    }
}
