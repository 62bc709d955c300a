//! Fire-and-forget progress notifications.
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::models::ContractStatus;

/// Global progress topic.
pub const NOTIFICATION_TOPIC: &str = "notification";

/// Per-contract topic for chat replies.
pub fn chat_topic(contract_id: &str) -> String {
    format!("chat_{contract_id}")
}

pub trait Notifier: Send + Sync {
    /// Never fails from the caller's point of view.
    fn publish(&self, topic: &str, payload: Value);
}

/// Pipeline progress, serialized as `{"type": ..., "content": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum Notification {
    Status {
        contract_id: String,
        status: ContractStatus,
    },
    ClauseAnalyzed {
        contract_id: String,
        completed: usize,
        total: usize,
    },
    Completed {
        contract_id: String,
        report: Value,
    },
    Failed {
        contract_id: String,
        status: ContractStatus,
        reason: String,
    },
}

impl Notification {
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn chat_payload(message: &str) -> Value {
    json!({ "message": message, "sender": "assistant" })
}

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
}

/// In-process pub/sub. Publishing with no subscribers drops the event.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Event>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: &str, payload: Value) {
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {topic}");
        }
    }
}
