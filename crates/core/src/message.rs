//! Transcript message types.
//!
//! Messages flow through the whole system:
//! caller sends an utterance → dispatcher appends it → handler answers with
//! text or action requests → executor appends action outcomes.
//!
//! A message is never mutated once it is part of a transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionRequest, ActionResult};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The customer
    User,
    /// A capability handler
    Assistant,
    /// Instructions injected for the language model
    System,
    /// Outcome of an executed action
    Action,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content (may be empty when only action requests are present)
    pub content: String,

    /// Actions requested by the handler, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,

    /// Set on `Role::Action` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_result: Option<ActionResult>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            action_requests: Vec::new(),
            action_result: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that requests actions.
    pub fn assistant_with_actions(
        content: impl Into<String>,
        action_requests: Vec<ActionRequest>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.action_requests = action_requests;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create the transcript entry for an action outcome.
    ///
    /// The content is the `{success, data | error}` envelope so a language
    /// model reading the transcript sees the same shape the backend returns.
    pub fn action_outcome(result: ActionResult) -> Self {
        let mut msg = Self::with_role(Role::Action, result.to_envelope().to_string());
        msg.action_result = Some(result);
        msg
    }

    /// Whether the message neither says anything nor asks for anything.
    pub fn is_empty_reply(&self) -> bool {
        self.content.trim().is_empty() && self.action_requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionOutcome;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Where is my order #1001?");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Where is my order #1001?");
        assert!(msg.action_requests.is_empty());
        assert!(msg.action_result.is_none());
    }

    #[test]
    fn action_outcome_content_is_envelope() {
        let result = ActionResult {
            request_id: "act_1".into(),
            name: "shopify_get_order_details".into(),
            outcome: ActionOutcome::Error("Order not found".into()),
        };
        let msg = Message::action_outcome(result);
        assert_eq!(msg.role, Role::Action);
        let envelope: serde_json::Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"], "Order not found");
    }

    #[test]
    fn empty_reply_detection() {
        assert!(Message::assistant("   ").is_empty_reply());
        assert!(!Message::assistant("Hi!").is_empty_reply());
        let req = ActionRequest::new("shopify_get_order_details", serde_json::Map::new());
        assert!(!Message::assistant_with_actions("", vec![req]).is_empty_reply());
    }

    #[test]
    fn message_serializes_camel_case() {
        let req = ActionRequest::new("shopify_get_order_details", serde_json::Map::new());
        let msg = Message::assistant_with_actions("", vec![req]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("actionRequests").is_some());
        assert_eq!(json["role"], "assistant");
    }
}
