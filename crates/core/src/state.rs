//! Conversation state and its reducers.
//!
//! Every change to a [`ConversationState`] goes through [`ConversationState::apply`]
//! with a [`StateUpdate`]. Each field has exactly one merge rule:
//!
//! | field              | reducer                 |
//! |--------------------|-------------------------|
//! | `messages`         | concatenation           |
//! | `current_intent`   | latest wins             |
//! | `customer_context` | shallow merge           |
//! | `event_log`        | concatenation           |
//! | `is_escalated`     | logical OR (monotonic)  |
//! | `escalation_detail`| latest non-null wins    |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::intent::{DecisionSource, IntentCategory, IntentDecision};
use crate::message::{Message, Role};

/// Structured summary of why a session went to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationDetail {
    /// Reason code (e.g. "CUSTOMER_REQUEST")
    pub reason: String,

    /// What the customer is told
    pub customer_message: String,

    /// Note for the human agent
    pub internal_summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl EscalationDetail {
    /// Read the detail out of an escalation action's success payload.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Classification {
        category: IntentCategory,
        confidence: f32,
        rationale: String,
        source: DecisionSource,
    },
    ActionRequest {
        request_id: String,
        name: String,
        payload: Value,
    },
    ActionResult {
        request_id: String,
        name: String,
        success: bool,
        payload: Value,
    },
    Reply {
        text: String,
    },
    Escalated {
        reason: String,
    },
    /// The session was already escalated; automation was bypassed.
    ShortCircuit,
    /// A recovered contract violation worth a human look.
    Anomaly {
        message: String,
    },
    Error {
        error_kind: String,
        message: String,
    },
}

/// A timestamped audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,

    #[serde(flatten)]
    pub record: AuditRecord,
}

impl AuditEntry {
    pub fn now(record: AuditRecord) -> Self {
        Self { at: Utc::now(), record }
    }

    pub fn classification(decision: &IntentDecision) -> Self {
        Self::now(AuditRecord::Classification {
            category: decision.category,
            confidence: decision.confidence,
            rationale: decision.rationale.clone(),
            source: decision.source,
        })
    }

    pub fn anomaly(message: impl Into<String>) -> Self {
        Self::now(AuditRecord::Anomaly { message: message.into() })
    }
}

/// The persisted state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: String,

    /// The transcript; append-only
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub current_intent: IntentCategory,

    #[serde(default)]
    pub customer_context: Map<String, Value>,

    #[serde(default)]
    pub event_log: Vec<AuditEntry>,

    /// Never clears once set
    #[serde(default)]
    pub is_escalated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_detail: Option<EscalationDetail>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A partial update, merged field by field.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub current_intent: Option<IntentCategory>,
    pub customer_context: Map<String, Value>,
    pub event_log: Vec<AuditEntry>,
    pub is_escalated: bool,
    pub escalation_detail: Option<EscalationDetail>,
}

impl StateUpdate {
    pub fn message(message: Message) -> Self {
        Self { messages: vec![message], ..Self::default() }
    }

    pub fn audit(entry: AuditEntry) -> Self {
        Self { event_log: vec![entry], ..Self::default() }
    }

    pub fn with_audit(mut self, entry: AuditEntry) -> Self {
        self.event_log.push(entry);
        self
    }

    /// Fold another update into this one using the same reducers as the state.
    pub fn merge(mut self, other: StateUpdate) -> Self {
        concat(&mut self.messages, other.messages);
        latest_non_null(&mut self.current_intent, other.current_intent);
        shallow_merge(&mut self.customer_context, other.customer_context);
        concat(&mut self.event_log, other.event_log);
        self.is_escalated = or(self.is_escalated, other.is_escalated);
        latest_non_null(&mut self.escalation_detail, other.escalation_detail);
        self
    }
}

fn concat<T>(current: &mut Vec<T>, new: Vec<T>) {
    current.extend(new);
}

fn latest_wins<T>(current: &mut T, new: Option<T>) {
    if let Some(v) = new {
        *current = v;
    }
}

fn shallow_merge(current: &mut Map<String, Value>, new: Map<String, Value>) {
    for (k, v) in new {
        current.insert(k, v);
    }
}

fn or(current: bool, new: bool) -> bool {
    current || new
}

fn latest_non_null<T>(current: &mut Option<T>, new: Option<T>) {
    if new.is_some() {
        *current = new;
    }
}

impl ConversationState {
    /// A fresh state for a session that has never been seen.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            current_intent: IntentCategory::default(),
            customer_context: Map::new(),
            event_log: Vec::new(),
            is_escalated: false,
            escalation_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge an update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        concat(&mut self.messages, update.messages);
        latest_wins(&mut self.current_intent, update.current_intent);
        shallow_merge(&mut self.customer_context, update.customer_context);
        concat(&mut self.event_log, update.event_log);
        self.is_escalated = or(self.is_escalated, update.is_escalated);
        latest_non_null(&mut self.escalation_detail, update.escalation_detail);
        self.updated_at = Utc::now();
    }

    /// The last `n` user utterances before the newest one, oldest first.
    pub fn recent_user_utterances(&self, n: usize) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        users.pop();
        let skip = users.len().saturating_sub(n);
        users.into_iter().skip(skip).collect()
    }

    /// Whether any message has been appended yet.
    pub fn is_new(&self) -> bool {
        self.messages.is_empty()
    }
}
