//! Inter-worker message model for the topic bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of message exchanged between workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Finding,
    StatusUpdate,
}

/// Delivery priority. Informational; the bus does not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Target of a message: one worker's inbox or every topic subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Worker(String),
    Broadcast,
}

/// A single message on the bus. Delivered at most once per subscriber
/// per publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub sender: String,
    pub recipient: Recipient,
    pub topic: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub priority: MessagePriority,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn broadcast(
        sender: impl Into<String>,
        topic: impl Into<String>,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: Recipient::Broadcast,
            topic: topic.into(),
            kind,
            priority: MessagePriority::default(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn direct(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        let recipient = recipient.into();
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            topic: inbox_topic(&recipient),
            recipient: Recipient::Worker(recipient),
            kind,
            priority: MessagePriority::default(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Short human-readable summary for observer events.
    pub fn summary(&self) -> String {
        let text = match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.chars().count() <= 80 {
            text
        } else {
            let head: String = text.chars().take(77).collect();
            format!("{head}...")
        }
    }
}

/// Topic that carries direct messages for one worker.
pub fn inbox_topic(worker_id: &str) -> String {
    format!("inbox.{worker_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_message_routes_to_inbox_topic() {
        let msg = AgentMessage::direct(
            "analyst",
            "scout",
            MessageKind::Request,
            serde_json::json!({"ask": "sources"}),
        );
        assert_eq!(msg.topic, "inbox.scout");
        assert_eq!(msg.recipient, Recipient::Worker("scout".to_string()));
    }

    #[test]
    fn summary_truncates_long_payloads() {
        let long = "x".repeat(200);
        let msg = AgentMessage::broadcast(
            "a",
            "findings",
            MessageKind::Finding,
            serde_json::Value::String(long),
        );
        assert!(msg.summary().len() <= 80);
        assert!(msg.summary().ends_with("..."));
    }
}
