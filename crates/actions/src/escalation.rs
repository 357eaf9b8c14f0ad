//! The reserved `escalate_to_human` action.
//!
//! It never talks to the backend. It validates the handler's escalation
//! request and echoes it back stamped with `escalatedAt`; the executor
//! turns a successful result into the session's escalation.

use async_trait::async_trait;
use chrono::Utc;
use deskpilot_core::action::{Action, ESCALATION_ACTION};
use deskpilot_core::error::ActionError;
use serde_json::{Map, Value, json};

pub const ESCALATION_REASONS: &[&str] = &[
    "CUSTOMER_REQUEST",
    "POLICY_VIOLATION",
    "COMPLEX_ISSUE",
    "TECHNICAL_ERROR",
    "SAFETY_CONCERN",
    "WORKFLOW_REQUIRED",
    "ORDER_NOT_FOUND",
    "SUBSCRIPTION_NOT_FOUND",
    "DATA_MISMATCH",
    "REFUND_LIMIT_EXCEEDED",
    "FRAUD_SUSPECTED",
    "OTHER",
];

pub struct EscalateToHuman;

fn required_text<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ActionError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ActionError::InvalidArguments(format!("'{key}' must be a non-empty string")))
}

#[async_trait]
impl Action for EscalateToHuman {
    fn name(&self) -> &str {
        ESCALATION_ACTION
    }

    fn description(&self) -> &str {
        "Hand the conversation to a human agent. Use when the customer asks for a person, \
         when a request is outside policy, or when the issue cannot be resolved with the \
         available actions. After this, automation stops for the session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string", "enum": ESCALATION_REASONS },
                "customerMessage": {
                    "type": "string",
                    "description": "What the customer is told while they wait"
                },
                "internalSummary": {
                    "type": "string",
                    "description": "Context for the human agent"
                },
                "suggestedAction": { "type": "string" }
            },
            "required": ["reason", "customerMessage", "internalSummary"]
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ActionError> {
        let reason = required_text(arguments, "reason")?;
        if !ESCALATION_REASONS.contains(&reason) {
            return Err(ActionError::InvalidArguments(format!(
                "unknown escalation reason '{reason}'"
            )));
        }
        let customer_message = required_text(arguments, "customerMessage")?;
        let internal_summary = required_text(arguments, "internalSummary")?;
        let suggested_action = arguments.get("suggestedAction").and_then(Value::as_str);

        tracing::info!(reason, "Escalation requested");

        Ok(json!({
            "reason": reason,
            "customerMessage": customer_message,
            "internalSummary": internal_summary,
            "suggestedAction": suggested_action,
            "escalatedAt": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_core::EscalationDetail;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn valid_request_yields_detail_payload() {
        let payload = EscalateToHuman
            .execute(&args(json!({
                "reason": "CUSTOMER_REQUEST",
                "customerMessage": "A teammate will reply shortly.",
                "internalSummary": "Customer asked for a human."
            })))
            .await
            .unwrap();

        let detail = EscalationDetail::from_payload(&payload).unwrap();
        assert_eq!(detail.reason, "CUSTOMER_REQUEST");
        assert_eq!(detail.customer_message, "A teammate will reply shortly.");
        assert!(detail.suggested_action.is_none());
        assert!(detail.escalated_at.is_some());
    }

    #[tokio::test]
    async fn unknown_reason_is_rejected() {
        let err = EscalateToHuman
            .execute(&args(json!({
                "reason": "BORED",
                "customerMessage": "x",
                "internalSummary": "y"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let err = EscalateToHuman
            .execute(&args(json!({
                "reason": "OTHER",
                "customerMessage": "   ",
                "internalSummary": "y"
            })))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("customerMessage"));
    }
}
