//! Event Broadcaster - voice feedback stream for the caller
//!
//! The surrounding voice layer subscribes and turns these into speech or UI updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    confirmation::ConfirmationResult,
    feedback::OperationStatus,
    risk::RiskLevel,
    session::{SessionStatus, SessionTransition},
};

/// Events emitted by the commander services
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VoiceEvent {
    /// A risky command is waiting for the user's assent
    #[serde(rename_all = "camelCase")]
    ConfirmationRequested {
        confirmation_id: Uuid,
        session_id: String,
        text: String,
        timeout_ms: u64,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    },

    /// The response matched neither a confirmation nor a rejection
    #[serde(rename_all = "camelCase")]
    ClarificationNeeded {
        confirmation_id: Uuid,
        session_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// The response was recognised with too little confidence
    #[serde(rename_all = "camelCase")]
    ConfirmationRepeatNeeded {
        confirmation_id: Uuid,
        session_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    DoubleConfirmationRequested {
        confirmation_id: Uuid,
        session_id: String,
        text: String,
        timeout_ms: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    ConfirmationCompleted { result: ConfirmationResult },

    #[serde(rename_all = "camelCase")]
    ContextUpdated {
        session_id: String,
        tool_name: String,
        current_directory: String,
        entity_count: u32,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
        user_id: String,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    SessionTransitioned {
        session_id: String,
        transition: SessionTransition,
    },

    #[serde(rename_all = "camelCase")]
    SessionRemoved {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    OperationStarted { operation: OperationStatus },

    #[serde(rename_all = "camelCase")]
    OperationProgress { operation: OperationStatus },

    /// Heartbeat while a long tool call is still pending
    #[serde(rename_all = "camelCase")]
    OperationStillRunning {
        operation: OperationStatus,
        elapsed_ms: u64,
    },

    #[serde(rename_all = "camelCase")]
    OperationCompleted { operation: OperationStatus },

    #[serde(rename_all = "camelCase")]
    OperationFailed { operation: OperationStatus },
}

impl VoiceEvent {
    /// Wire name of the event, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceEvent::ConfirmationRequested { .. } => "confirmationRequested",
            VoiceEvent::ClarificationNeeded { .. } => "clarificationNeeded",
            VoiceEvent::ConfirmationRepeatNeeded { .. } => "confirmationRepeatNeeded",
            VoiceEvent::DoubleConfirmationRequested { .. } => "doubleConfirmationRequested",
            VoiceEvent::ConfirmationCompleted { .. } => "confirmationCompleted",
            VoiceEvent::ContextUpdated { .. } => "contextUpdated",
            VoiceEvent::SessionCreated { .. } => "sessionCreated",
            VoiceEvent::SessionTransitioned { .. } => "sessionTransitioned",
            VoiceEvent::SessionRemoved { .. } => "sessionRemoved",
            VoiceEvent::OperationStarted { .. } => "operationStarted",
            VoiceEvent::OperationProgress { .. } => "operationProgress",
            VoiceEvent::OperationStillRunning { .. } => "operationStillRunning",
            VoiceEvent::OperationCompleted { .. } => "operationCompleted",
            VoiceEvent::OperationFailed { .. } => "operationFailed",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> &str {
        match self {
            VoiceEvent::ConfirmationRequested { session_id, .. }
            | VoiceEvent::ClarificationNeeded { session_id, .. }
            | VoiceEvent::ConfirmationRepeatNeeded { session_id, .. }
            | VoiceEvent::DoubleConfirmationRequested { session_id, .. }
            | VoiceEvent::ContextUpdated { session_id, .. }
            | VoiceEvent::SessionCreated { session_id, .. }
            | VoiceEvent::SessionTransitioned { session_id, .. }
            | VoiceEvent::SessionRemoved { session_id, .. } => session_id,
            VoiceEvent::ConfirmationCompleted { result } => &result.session_id,
            VoiceEvent::OperationStarted { operation }
            | VoiceEvent::OperationProgress { operation }
            | VoiceEvent::OperationStillRunning { operation, .. }
            | VoiceEvent::OperationCompleted { operation }
            | VoiceEvent::OperationFailed { operation } => &operation.session_id,
        }
    }
}

/// Broadcasts events to all subscribers
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self { sender }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast(&self, event: VoiceEvent) {
        tracing::trace!("[EVENTS] {} for {}", event.kind(), event.session_id());
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }

    pub fn session_removed(&self, session_id: &str) {
        self.broadcast(VoiceEvent::SessionRemoved {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn context_updated(
        &self,
        session_id: &str,
        tool_name: &str,
        current_directory: &str,
        entity_count: u32,
    ) {
        self.broadcast(VoiceEvent::ContextUpdated {
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            current_directory: current_directory.to_string(),
            entity_count,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
