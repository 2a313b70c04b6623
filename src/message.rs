//! The `Message` and `Envelope` data shapes shared by every subsystem.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The wire-format version this build understands. An envelope carrying a
/// different value is discarded outright (spec §3, Envelope invariant).
pub const WIRE_VERSION: u32 = 1;

/// Reserved `meta` keys, set by adapters rather than callers.
pub mod reserved_meta_keys {
    pub const SOURCE: &str = "source";
    pub const CROSS_TAB: &str = "_crossTab";
    pub const SOURCE_CLIENT_ID: &str = "_sourceClientId";
    pub const ORIGIN: &str = "_origin";
    pub const SEQUENCE: &str = "_sequence";
}

/// A message as seen by the local bus and its subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub ts: u64,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}

impl Message {
    pub fn meta_get(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|m| m.get(key))
    }

    pub fn meta_set(&mut self, key: &str, value: Value) {
        self.meta
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value);
    }
}

/// The wire representation used by every adapter: a `Message` plus
/// transport-level identity fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub topic: String,
    pub payload: Value,
    pub timestamp: u64,
    pub version: u32,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "schemaVersion", skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, Value>>,
}

/// Options accepted by `LocalBus::publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub schema_version: Option<String>,
    pub meta: Option<HashMap<String, Value>>,
}

/// Options accepted by `getHistory` on both the local bus and the history
/// adapter.
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    pub limit: Option<usize>,
    pub from_time: Option<u64>,
}
