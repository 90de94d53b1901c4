//! Hand-off of finished responses to history storage.

use crate::error::StreamResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::VecDeque;
use uuid::Uuid;

/// Default number of records kept by [`MemoryHistory`].
pub const MAX_HISTORY_ITEMS: usize = 50;

/// A finished response, ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Record ID.
    pub id: Uuid,
    /// When the stream completed.
    pub created_at: DateTime<Utc>,
    /// The prompt or question that produced the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// The full accumulated response text.
    pub content: String,
    /// Request ID of the stream, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Caller-defined extra data (spread, cards, reading type, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, JsonValue>,
}

impl HistoryRecord {
    /// Create a record for `content`, stamped now.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            prompt: None,
            content: content.into(),
            request_id: None,
            metadata: Map::new(),
        }
    }

    /// Set the prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set the request ID.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: Map<String, JsonValue>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Destination for finished responses.
///
/// Saves run detached from the stream; a failure is logged by the caller and
/// never changes the outcome of the stream.
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Store one record.
    async fn save(&self, record: HistoryRecord) -> StreamResult<()>;
}

/// In-memory history, newest first, bounded.
#[derive(Debug)]
pub struct MemoryHistory {
    records: Mutex<VecDeque<HistoryRecord>>,
    capacity: usize,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHistory {
    /// Create a history holding up to [`MAX_HISTORY_ITEMS`] records.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_ITEMS)
    }

    /// Create a history with a custom bound.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// All records, newest first.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<HistoryRecord> {
        self.records.lock().front().cloned()
    }

    /// Look up a record by ID.
    pub fn get(&self, id: Uuid) -> Option<HistoryRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Remove a record. Returns whether it existed.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn save(&self, record: HistoryRecord) -> StreamResult<()> {
        let mut records = self.records.lock();
        records.push_front(record);
        records.truncate(self.capacity);
        Ok(())
    }
}
