//! Queue message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{MessageId, PopReceipt};
use crate::ports::VisibilityUpdate;

/// A message as seen by one dequeue.
///
/// Design:
/// - The backend owns the message; this is a snapshot taken at dequeue time.
/// - `pop_receipt` and `next_visible_time` change on every dequeue and every
///   visibility update, so the lease holder keeps its own copy current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    pub body: Vec<u8>,

    /// Incremented by the backend each time the message is dequeued without
    /// being deleted.
    pub dequeue_count: u32,

    pub pop_receipt: Option<PopReceipt>,
    pub insertion_time: DateTime<Utc>,
    pub next_visible_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl QueueMessage {
    /// The body as UTF-8, when it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Record a successful lease extension.
    pub fn apply_visibility(&mut self, update: VisibilityUpdate) {
        self.pop_receipt = Some(update.pop_receipt);
        self.next_visible_time = Some(update.next_visible_time);
    }

    /// Trigger binding data exposed to functions.
    ///
    /// `QueueTrigger` is only present when the body is valid UTF-8.
    pub fn binding_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        if let Some(text) = self.as_text() {
            data.insert("QueueTrigger".to_string(), Value::from(text));
        }
        data.insert("DequeueCount".to_string(), Value::from(self.dequeue_count));
        data.insert(
            "ExpirationTime".to_string(),
            optional_time(self.expiration_time),
        );
        data.insert("Id".to_string(), Value::from(self.id.as_str()));
        data.insert(
            "InsertionTime".to_string(),
            Value::from(self.insertion_time.to_rfc3339()),
        );
        data.insert(
            "NextVisibleTime".to_string(),
            optional_time(self.next_visible_time),
        );
        data.insert(
            "PopReceipt".to_string(),
            self.pop_receipt
                .as_ref()
                .map(|r| Value::from(r.as_str()))
                .unwrap_or(Value::Null),
        );
        data
    }
}

fn optional_time(time: Option<DateTime<Utc>>) -> Value {
    time.map(|t| Value::from(t.to_rfc3339()))
        .unwrap_or(Value::Null)
}
