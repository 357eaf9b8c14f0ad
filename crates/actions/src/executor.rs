//! Action executor: runs one action request and classifies the outcome.
//!
//! Nothing escapes this boundary as an `Err`: unknown actions, argument
//! problems, backend failures and timeouts all come back as error
//! [`ActionResult`]s so the handler can react to them.
//!
//! Escalation detection lives here and only here: a successful result of
//! [`ESCALATION_ACTION`] escalates the session no matter which handler
//! asked for it.

use chrono::Utc;
use deskpilot_core::action::{ActionRegistry, ActionRequest, ActionResult, ESCALATION_ACTION};
use deskpilot_core::error::ActionError;
use deskpilot_core::event::{DomainEvent, EventBus};
use deskpilot_core::message::Message;
use deskpilot_core::state::{AuditEntry, AuditRecord, EscalationDetail, StateUpdate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The outcome of one executed (or rejected) request.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: ActionResult,
    /// Set when this result escalated the session.
    pub escalation: Option<EscalationDetail>,
    pub duration_ms: u64,
}

impl Execution {
    /// A request that was never run (not permitted, abandoned turn, ...).
    pub fn rejected(request: &ActionRequest, reason: impl Into<String>) -> Self {
        Self {
            result: ActionResult::error(request, reason),
            escalation: None,
            duration_ms: 0,
        }
    }

    pub fn escalated(&self) -> bool {
        self.escalation.is_some()
    }

    /// The state delta this execution contributes: the action-outcome
    /// message, its audit entry, and the escalation if any.
    pub fn into_update(self) -> StateUpdate {
        let audit = AuditEntry::now(AuditRecord::ActionResult {
            request_id: self.result.request_id.clone(),
            name: self.result.name.clone(),
            success: self.result.is_success(),
            payload: self.result.to_envelope(),
        });

        let mut update = StateUpdate::message(Message::action_outcome(self.result)).with_audit(audit);

        if let Some(detail) = self.escalation {
            update = update.with_audit(AuditEntry::now(AuditRecord::Escalated {
                reason: detail.reason.clone(),
            }));
            update.is_escalated = true;
            update.escalation_detail = Some(detail);
        }
        update
    }
}

/// Runs requests against the global registry.
#[derive(Clone)]
pub struct ActionExecutor {
    registry: ActionRegistry,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ActionExecutor {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Execute one request. Never fails.
    pub async fn execute(&self, session_id: &str, request: &ActionRequest) -> Execution {
        debug!(session_id, action = %request.name, request_id = %request.id, "Executing action");
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.registry.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ActionError::Timeout {
                action_name: request.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (result, escalation) = match outcome {
            Ok(data) => {
                let escalation = (request.name == ESCALATION_ACTION).then(|| {
                    EscalationDetail::from_payload(&data).unwrap_or_else(|| {
                        warn!(session_id, "Escalation payload unreadable, escalating anyway");
                        EscalationDetail {
                            reason: "OTHER".into(),
                            customer_message: String::new(),
                            internal_summary: data.to_string(),
                            suggested_action: None,
                            escalated_at: Some(Utc::now()),
                        }
                    })
                });
                (ActionResult::success(request, data), escalation)
            }
            Err(e) => {
                match &e {
                    ActionError::NotFound(_) => {
                        warn!(session_id, action = %request.name, "Unknown action requested")
                    }
                    _ => warn!(session_id, action = %request.name, error = %e, "Action failed"),
                }
                (ActionResult::error(request, e.to_string()), None)
            }
        };

        if let Some(events) = &self.events {
            events.publish(DomainEvent::ActionExecuted {
                session_id: session_id.to_string(),
                action_name: request.name.clone(),
                success: result.is_success(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        if let Some(detail) = &escalation {
            info!(session_id, reason = %detail.reason, "Session escalated");
        }

        Execution {
            result,
            escalation,
            duration_ms,
        }
    }
}
