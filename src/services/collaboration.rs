//! Collaboration sessions: negotiation transcripts with consensus tracking.
//!
//! A session collects turns from its participants and concludes either when
//! every participant has signalled agreement (consensus) or when the session
//! timeout fires (no consensus, transcript retained). A session is never
//! left open: a timer armed at start guarantees conclusion, so
//! `await_outcome` always resolves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::services::swarm_events::{SwarmEventBus, SwarmEventData};

/// Folds participant-declared confidences into a session confidence.
pub type ConfidenceAggregator = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Arithmetic mean clamped to [0, 1]. The default aggregator.
pub fn mean_confidence(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    mean.clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct CollaborationConfig {
    pub session_timeout: Duration,
    pub aggregator: ConfidenceAggregator,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            aggregator: Arc::new(mean_confidence),
        }
    }
}

impl std::fmt::Debug for CollaborationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationConfig")
            .field("session_timeout", &self.session_timeout)
            .finish_non_exhaustive()
    }
}

/// One utterance in a session transcript.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub speaker: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Session state, snapshot-able for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct CollaborationSession {
    pub id: Uuid,
    pub session_type: String,
    pub topic: String,
    pub participants: Vec<String>,
    pub transcript: Vec<Turn>,
    /// Declared confidence per participant that has agreed.
    pub agreements: HashMap<String, f64>,
    pub consensus: Option<bool>,
    pub confidence: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub concluded_at: Option<DateTime<Utc>>,
}

impl CollaborationSession {
    pub fn is_concluded(&self) -> bool {
        self.concluded_at.is_some()
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub consensus: bool,
    pub confidence: f64,
}

struct SessionState {
    session: CollaborationSession,
    outcome_tx: watch::Sender<Option<SessionOutcome>>,
    timer: Option<JoinHandle<()>>,
}

/// Per-run collaboration manager.
pub struct CollaborationManager {
    sessions: Arc<RwLock<HashMap<Uuid, SessionState>>>,
    config: CollaborationConfig,
    events: SwarmEventBus,
}

impl CollaborationManager {
    pub fn new(config: CollaborationConfig, events: SwarmEventBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            events,
        }
    }

    /// Open a session and arm its timeout.
    pub async fn start_session(
        &self,
        session_type: impl Into<String>,
        topic: impl Into<String>,
        participants: Vec<String>,
    ) -> Uuid {
        let session_type = session_type.into();
        let session = CollaborationSession {
            id: Uuid::new_v4(),
            session_type: session_type.clone(),
            topic: topic.into(),
            participants: participants.clone(),
            transcript: Vec::new(),
            agreements: HashMap::new(),
            consensus: None,
            confidence: None,
            started_at: Utc::now(),
            concluded_at: None,
        };
        let id = session.id;
        let (outcome_tx, _) = watch::channel(None);

        let timer = {
            let sessions = Arc::clone(&self.sessions);
            let events = self.events.clone();
            let aggregator = Arc::clone(&self.config.aggregator);
            let timeout = self.config.session_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                debug!(session_id = %id, "collaboration session timed out");
                conclude(&sessions, &events, &aggregator, id, false).await;
            })
        };

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                id,
                SessionState {
                    session,
                    outcome_tx,
                    timer: Some(timer),
                },
            );
        }

        info!(session_id = %id, session_type = %session_type, "collaboration session started");
        self.events.emit(SwarmEventData::CollaborationStarted {
            session_type,
            participants,
        });
        id
    }

    /// Append a turn to an open session.
    pub async fn append_turn(
        &self,
        session_id: Uuid,
        speaker: &str,
        message: impl Into<String>,
    ) -> SwarmResult<()> {
        let message = message.into();
        {
            let mut sessions = self.sessions.write().await;
            let state = sessions
                .get_mut(&session_id)
                .ok_or(SwarmError::SessionNotFound(session_id))?;
            if state.session.is_concluded() {
                return Err(SwarmError::SessionConcluded(session_id));
            }
            if !state.session.participants.iter().any(|p| p == speaker) {
                return Err(SwarmError::NotAParticipant(speaker.to_string()));
            }
            state.session.transcript.push(Turn {
                speaker: speaker.to_string(),
                message: message.clone(),
                timestamp: Utc::now(),
            });
        }

        self.events.emit(SwarmEventData::AgentConversation {
            from: speaker.to_string(),
            to: "all".to_string(),
            message,
        });
        Ok(())
    }

    /// Record a participant's agreement with a declared confidence.
    ///
    /// When the last participant agrees the session concludes with
    /// consensus. Re-signalling updates the declared confidence.
    pub async fn signal_agreement(
        &self,
        session_id: Uuid,
        speaker: &str,
        confidence: f64,
    ) -> SwarmResult<()> {
        let all_agreed = {
            let mut sessions = self.sessions.write().await;
            let state = sessions
                .get_mut(&session_id)
                .ok_or(SwarmError::SessionNotFound(session_id))?;
            if state.session.is_concluded() {
                return Err(SwarmError::SessionConcluded(session_id));
            }
            if !state.session.participants.iter().any(|p| p == speaker) {
                return Err(SwarmError::NotAParticipant(speaker.to_string()));
            }
            state
                .session
                .agreements
                .insert(speaker.to_string(), confidence.clamp(0.0, 1.0));
            state.session.agreements.len() == state.session.participants.len()
        };

        if all_agreed {
            conclude(
                &self.sessions,
                &self.events,
                &self.config.aggregator,
                session_id,
                true,
            )
            .await;
        }
        Ok(())
    }

    /// Wait for the session's terminal outcome. The timeout timer armed at
    /// start guarantees this resolves within `session_timeout`.
    pub async fn await_outcome(&self, session_id: Uuid) -> SwarmResult<SessionOutcome> {
        let mut rx = {
            let sessions = self.sessions.read().await;
            let state = sessions
                .get(&session_id)
                .ok_or(SwarmError::SessionNotFound(session_id))?;
            state.outcome_tx.subscribe()
        };

        let value = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| SwarmError::SessionNotFound(session_id))?;
        value
            .clone()
            .ok_or(SwarmError::SessionNotFound(session_id))
    }

    /// Snapshot of a session, concluded or not.
    pub async fn get_session(&self, session_id: Uuid) -> SwarmResult<CollaborationSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|s| s.session.clone())
            .ok_or(SwarmError::SessionNotFound(session_id))
    }
}

/// Conclude a session exactly once; later calls are no-ops.
async fn conclude(
    sessions: &RwLock<HashMap<Uuid, SessionState>>,
    events: &SwarmEventBus,
    aggregator: &ConfidenceAggregator,
    session_id: Uuid,
    consensus: bool,
) {
    let outcome = {
        let mut sessions = sessions.write().await;
        let Some(state) = sessions.get_mut(&session_id) else {
            return;
        };
        if state.session.is_concluded() {
            return;
        }

        let confidences: Vec<f64> = state.session.agreements.values().copied().collect();
        let confidence = if consensus { aggregator(&confidences) } else { 0.0 };

        state.session.consensus = Some(consensus);
        state.session.confidence = Some(confidence);
        state.session.concluded_at = Some(Utc::now());

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let outcome = SessionOutcome {
            session_id,
            consensus,
            confidence,
        };
        let _ = state.outcome_tx.send(Some(outcome.clone()));
        outcome
    };

    info!(
        session_id = %session_id,
        consensus = outcome.consensus,
        confidence = outcome.confidence,
        "collaboration session concluded"
    );
    events.emit(SwarmEventData::CollaborationComplete {
        consensus_reached: outcome.consensus,
        confidence: outcome.confidence,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout: Duration) -> CollaborationManager {
        CollaborationManager::new(
            CollaborationConfig {
                session_timeout: timeout,
                aggregator: Arc::new(mean_confidence),
            },
            SwarmEventBus::default(),
        )
    }

    #[tokio::test]
    async fn consensus_when_all_participants_agree() {
        let m = manager(Duration::from_secs(60));
        let id = m
            .start_session("negotiation", "weights", vec!["a".into(), "b".into()])
            .await;

        m.append_turn(id, "a", "propose 0.6/0.4").await.unwrap();
        m.signal_agreement(id, "a", 0.9).await.unwrap();
        m.signal_agreement(id, "b", 0.7).await.unwrap();

        let outcome = m.await_outcome(id).await.unwrap();
        assert!(outcome.consensus);
        assert!((outcome.confidence - 0.8).abs() < 1e-9);

        let session = m.get_session(id).await.unwrap();
        assert_eq!(session.transcript.len(), 1);
        assert!(session.is_concluded());
    }

    #[tokio::test(start_paused = true)]
    async fn session_times_out_without_consensus() {
        let m = manager(Duration::from_millis(50));
        let id = m
            .start_session("negotiation", "weights", vec!["a".into(), "b".into()])
            .await;
        m.signal_agreement(id, "a", 0.9).await.unwrap();

        let outcome = m.await_outcome(id).await.unwrap();
        assert!(!outcome.consensus);
        assert_eq!(outcome.confidence, 0.0);

        // Transcript and partial agreements survive conclusion.
        let session = m.get_session(id).await.unwrap();
        assert_eq!(session.agreements.len(), 1);
    }

    #[tokio::test]
    async fn concluded_session_rejects_further_activity() {
        let m = manager(Duration::from_secs(60));
        let id = m.start_session("vote", "t", vec!["a".into()]).await;
        m.signal_agreement(id, "a", 1.0).await.unwrap();
        m.await_outcome(id).await.unwrap();

        assert!(matches!(
            m.append_turn(id, "a", "late").await,
            Err(SwarmError::SessionConcluded(_))
        ));
        assert!(matches!(
            m.signal_agreement(id, "a", 0.5).await,
            Err(SwarmError::SessionConcluded(_))
        ));
    }

    #[tokio::test]
    async fn non_participants_are_rejected() {
        let m = manager(Duration::from_secs(60));
        let id = m.start_session("vote", "t", vec!["a".into()]).await;

        assert!(matches!(
            m.append_turn(id, "intruder", "hi").await,
            Err(SwarmError::NotAParticipant(_))
        ));
    }

    #[tokio::test]
    async fn unknown_session_errors() {
        let m = manager(Duration::from_secs(60));
        assert!(matches!(
            m.await_outcome(Uuid::new_v4()).await,
            Err(SwarmError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_events_are_emitted() {
        let events = SwarmEventBus::default();
        let mut rx = events.subscribe();
        let m = CollaborationManager::new(
            CollaborationConfig {
                session_timeout: Duration::from_secs(60),
                aggregator: Arc::new(mean_confidence),
            },
            events,
        );

        let id = m.start_session("negotiation", "t", vec!["a".into()]).await;
        m.append_turn(id, "a", "hello").await.unwrap();
        m.signal_agreement(id, "a", 1.0).await.unwrap();
        m.await_outcome(id).await.unwrap();

        let kinds: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e.data {
                SwarmEventData::CollaborationStarted { .. } => "started",
                SwarmEventData::AgentConversation { .. } => "turn",
                SwarmEventData::CollaborationComplete { .. } => "complete",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "turn", "complete"]);
    }

    #[tokio::test]
    async fn custom_aggregator_is_used() {
        let m = CollaborationManager::new(
            CollaborationConfig {
                session_timeout: Duration::from_secs(60),
                aggregator: Arc::new(|values: &[f64]| {
                    values.iter().copied().fold(f64::INFINITY, f64::min)
                }),
            },
            SwarmEventBus::default(),
        );

        let id = m.start_session("vote", "t", vec!["a".into(), "b".into()]).await;
        m.signal_agreement(id, "a", 0.9).await.unwrap();
        m.signal_agreement(id, "b", 0.3).await.unwrap();

        let outcome = m.await_outcome(id).await.unwrap();
        assert!((outcome.confidence - 0.3).abs() < 1e-9);
    }
}
