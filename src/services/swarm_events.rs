//! Observer event stream: the envelope external watchers consume.
//!
//! Every run owns one broadcast channel of `SwarmEventEnvelope`. Components
//! emit as things happen; subscribers (a websocket bridge, a progress UI,
//! tests) receive a live feed. No history is replayed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::models::blackboard::DataCategory;

/// Wire envelope for observer events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEventEnvelope {
    /// Always `"swarm_event"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub data: SwarmEventData,
}

impl SwarmEventEnvelope {
    pub fn new(data: SwarmEventData) -> Self {
        Self {
            kind: "swarm_event".to_string(),
            data,
        }
    }
}

/// Observer event payloads, tagged by `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SwarmEventData {
    CollaborationStarted {
        session_type: String,
        participants: Vec<String>,
    },
    AgentConversation {
        from: String,
        to: String,
        message: String,
    },
    CollaborationComplete {
        consensus_reached: bool,
        confidence: f64,
    },
    PlanValidated {
        agents_consulted: Vec<String>,
        phases_count: usize,
        tasks_count: usize,
    },
    MessageSent {
        from: String,
        topic: String,
        summary: String,
    },
    BlackboardUpdate {
        key: String,
        category: DataCategory,
        source: String,
    },
}

/// Per-run broadcast channel for observer events.
///
/// Cheap to clone; every component in a run holds a handle to the same
/// channel. Emission never blocks and never fails: with no subscribers
/// the event is simply dropped.
#[derive(Debug, Clone)]
pub struct SwarmEventBus {
    sender: broadcast::Sender<SwarmEventEnvelope>,
}

impl SwarmEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, data: SwarmEventData) {
        let _ = self.sender.send(SwarmEventEnvelope::new(data));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SwarmEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_tagged_event_type() {
        let envelope = SwarmEventEnvelope::new(SwarmEventData::CollaborationComplete {
            consensus_reached: true,
            confidence: 0.85,
        });

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "swarm_event");
        assert_eq!(json["data"]["event_type"], "collaboration_complete");
        assert_eq!(json["data"]["consensus_reached"], true);
    }

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let bus = SwarmEventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(SwarmEventData::MessageSent {
            from: "scout".to_string(),
            topic: "findings".to_string(),
            summary: "hello".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.data, SwarmEventData::MessageSent { .. }));
    }

    #[test]
    fn plan_validated_lists_agents_by_id() {
        let envelope = SwarmEventEnvelope::new(SwarmEventData::PlanValidated {
            agents_consulted: vec!["analyst".to_string(), "scout".to_string()],
            phases_count: 2,
            tasks_count: 4,
        });

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["data"]["event_type"], "plan_validated");
        assert!(json["data"]["agents_consulted"].is_array());
        assert_eq!(
            json["data"]["agents_consulted"],
            serde_json::json!(["analyst", "scout"])
        );
    }

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = SwarmEventBus::default();
        bus.emit(SwarmEventData::PlanValidated {
            agents_consulted: vec!["scout".to_string()],
            phases_count: 1,
            tasks_count: 1,
        });
    }
}
