//! Domain event system: decoupled communication between bounded contexts.
//!
//! The dispatcher publishes an event whenever a turn finishes, an action
//! runs, or a session escalates. The gateway relays them as a live log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::intent::IntentCategory;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A turn ran to completion
    TurnCompleted {
        session_id: String,
        intent: IntentCategory,
        iterations: usize,
        is_escalated: bool,
        timestamp: DateTime<Utc>,
    },

    /// An action was executed
    ActionExecuted {
        session_id: String,
        action_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A session was handed to a human
    SessionEscalated {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// SSE event name for the live log.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnCompleted { .. } => "turn_completed",
            Self::ActionExecuted { .. } => "action_executed",
            Self::SessionEscalated { .. } => "session_escalated",
            Self::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

/// Fan-out of domain events to any number of listeners.
///
/// A slow listener that falls more than `capacity` events behind sees
/// `RecvError::Lagged` and skips ahead; publishers never wait.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // An error only means nobody is listening.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
