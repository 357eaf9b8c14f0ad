//! The dispatch loop.
//!
//! One turn runs as an explicit state machine:
//!
//! ```text
//! ROUTING → HANDLING → (AWAITING_ACTIONS → EXECUTING → HANDLING)* → DONE
//! ```
//!
//! with `ESCALATED_DONE` as the short circuit for sessions a human already
//! owns. Every state change goes through [`ConversationState::apply`], and
//! the state is persisted on every exit path, errors included.

use chrono::Utc;
use deskpilot_actions::{ActionExecutor, Execution};
use deskpilot_config::{AppConfig, EscalationPolicy};
use deskpilot_core::action::{ActionRegistry, ActionRequest};
use deskpilot_core::event::{DomainEvent, EventBus};
use deskpilot_core::intent::IntentCategory;
use deskpilot_core::message::{Message, Role};
use deskpilot_core::policy::PolicyProvider;
use deskpilot_core::provider::Provider;
use deskpilot_core::session::SessionStore;
use deskpilot_core::state::{AuditEntry, AuditRecord, ConversationState, StateUpdate};
use deskpilot_core::{Error, ErrorKind, Result};
use deskpilot_sessions::SessionLocks;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::classifier::{ClassifierContext, IntentClassifier, LlmClassifier};
use crate::handler::{CapabilityHandler, HandlerSet, standard_capabilities};
use crate::stream_event::{DispatchEvent, EventSink};

/// Reply for every turn of a session a human has taken over.
pub const ESCALATED_SESSION_REPLY: &str = "This conversation has been escalated to our support team. \
A human agent will respond to you shortly. Please wait for their reply.";

/// Reply when a turn escalates without a customer-facing message.
pub const CONNECTING_REPLY: &str =
    "I'm connecting you with our support team who can better assist you. They'll be with you shortly!";

/// Reply when a handler produced neither text nor actions.
pub const EMPTY_REPLY_FALLBACK: &str =
    "I'm sorry, I couldn't put together an answer just now. Could you rephrase your request?";

/// Reply when the per-turn iteration cap is hit.
pub const ITERATION_CAP_REPLY: &str = "I'm sorry, I'm having trouble completing this request right now. \
Please try again, or ask to speak with a member of our support team.";

/// Reply when a handler fails for a reason other than configuration.
pub const HANDLER_ERROR_REPLY: &str =
    "I'm sorry, something went wrong on our side while handling your request. Please try again in a moment.";

const TURN_ABANDONED: &str = "Turn abandoned before this action ran";

/// One caller utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub session_id: String,
    pub utterance: String,
    /// Shallow-merged into the session's customer context
    #[serde(default)]
    pub customer_context: Map<String, Value>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, utterance: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            utterance: utterance.into(),
            customer_context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.customer_context = context;
        self
    }
}

/// An action request or result recorded during the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// "action_request" or "action_result"
    pub kind: String,
    pub name: String,
    pub payload: Value,
}

/// The blocking response to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub success: bool,
    pub reply: String,
    pub intent_category: IntentCategory,
    pub session_id: String,
    pub action_log: Vec<ActionLogEntry>,
    pub is_escalated: bool,
    /// Handler invocations this turn
    #[serde(default)]
    pub iterations: usize,
}

enum Phase {
    Routing,
    Handling,
    AwaitingActions(Vec<ActionRequest>),
    Executing(Vec<Planned>),
    Done(Ending),
    EscalatedDone,
    Abandoned,
}

enum Planned {
    Run(ActionRequest),
    Reject(ActionRequest, String),
}

/// How a turn ended.
enum Ending {
    /// The handler's own text, already in the transcript
    Handler(String),
    /// Text the loop composed; still to be appended and streamed
    Composed(String),
    ShortCircuit,
    Abandoned,
}

/// Mutable bookkeeping for the turn in flight.
struct Turn {
    state: ConversationState,
    utterance: String,
    had_history: bool,
    log_start: usize,
    handler: Option<Arc<dyn CapabilityHandler>>,
    iterations: usize,
    success: bool,
    escalated: bool,
}

impl Turn {
    fn start(mut state: ConversationState, request: TurnRequest) -> Self {
        let had_history = state.messages.iter().any(|m| m.role == Role::User);
        let log_start = state.event_log.len();
        state.apply(StateUpdate {
            messages: vec![Message::user(&request.utterance)],
            customer_context: request.customer_context,
            ..StateUpdate::default()
        });
        Self {
            state,
            utterance: request.utterance,
            had_history,
            log_start,
            handler: None,
            iterations: 0,
            success: true,
            escalated: false,
        }
    }

    fn handler(&self) -> Result<Arc<dyn CapabilityHandler>> {
        self.handler
            .clone()
            .ok_or_else(|| Error::Internal("handler invoked before routing".into()))
    }

    fn audit(&mut self, entry: AuditEntry) {
        self.state.apply(StateUpdate::audit(entry));
    }

    fn anomaly(&mut self, message: String) {
        warn!(session_id = %self.state.session_id, "{message}");
        self.audit(AuditEntry::anomaly(message));
    }

    fn record_error(&mut self, e: &Error) {
        self.audit(AuditEntry::now(AuditRecord::Error {
            error_kind: e.kind().as_str().to_string(),
            message: e.to_string(),
        }));
    }

    fn action_log(&self) -> Vec<ActionLogEntry> {
        self.state.event_log[self.log_start..]
            .iter()
            .filter_map(|entry| match &entry.record {
                AuditRecord::ActionRequest { name, payload, .. } => Some(ActionLogEntry {
                    kind: "action_request".into(),
                    name: name.clone(),
                    payload: payload.clone(),
                }),
                AuditRecord::ActionResult { name, payload, .. } => Some(ActionLogEntry {
                    kind: "action_result".into(),
                    name: name.clone(),
                    payload: payload.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// The customer-facing text for a turn that escalated.
fn escalated_reply(state: &ConversationState) -> String {
    state
        .escalation_detail
        .as_ref()
        .map(|d| d.customer_message.trim())
        .filter(|m| !m.is_empty())
        .unwrap_or(CONNECTING_REPLY)
        .to_string()
}

/// Routes utterances to handlers and drives each turn to completion.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Arc<dyn IntentClassifier>,
    handlers: HandlerSet,
    executor: ActionExecutor,
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    events: Arc<EventBus>,
    max_iterations: usize,
    escalation_policy: EscalationPolicy,
    history_window: usize,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        handlers: HandlerSet,
        executor: ActionExecutor,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            classifier,
            handlers,
            executor,
            store,
            locks: SessionLocks::new(),
            events: Arc::new(EventBus::default()),
            max_iterations: 25,
            escalation_policy: EscalationPolicy::default(),
            history_window: 5,
        }
    }

    /// The standard store dispatcher: language-model classifier and the four
    /// language-model handlers over `registry`.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        registry: ActionRegistry,
        store: Arc<dyn SessionStore>,
        policies: Arc<dyn PolicyProvider>,
    ) -> Self {
        let classifier_model = config
            .dispatch
            .classifier_model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        let classifier =
            LlmClassifier::new(provider.clone(), classifier_model).with_capabilities(standard_capabilities());
        let handlers = HandlerSet::standard(&registry, provider, policies, config);
        let executor =
            ActionExecutor::new(registry).with_timeout(Duration::from_secs(config.backend.timeout_secs));

        Self::new(Arc::new(classifier), handlers, executor, store)
            .with_max_iterations(config.dispatch.max_iterations)
            .with_escalation_policy(config.dispatch.escalation_policy)
            .with_history_window(config.dispatch.history_window)
    }

    /// Set the maximum number of handler invocations per turn.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_escalation_policy(mut self, policy: EscalationPolicy) -> Self {
        self.escalation_policy = policy;
        self
    }

    /// Set how many earlier user utterances the classifier sees.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Publish domain events (and the executor's) on `events`.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_event_bus(events.clone());
        self.events = events;
        self
    }

    /// Share per-session locks with another dispatcher over the same store.
    pub fn with_locks(mut self, locks: SessionLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run one turn and return the full result.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        self.drive(request, &EventSink::none()).await
    }

    /// Run one turn on its own task, streaming events as they happen.
    ///
    /// The last event is always `done` or `error`, after which the channel
    /// closes. Dropping the receiver abandons the turn at the next handler
    /// call or action; what happened so far is still persisted.
    pub fn run_stream(&self, request: TurnRequest) -> mpsc::Receiver<DispatchEvent> {
        let (tx, rx) = mpsc::channel(64);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let sink = EventSink::channel(tx.clone());
            let terminal = match dispatcher.drive(request, &sink).await {
                Ok(outcome) => DispatchEvent::Done(outcome),
                Err(e) => DispatchEvent::from_error(&e),
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }

    pub(crate) async fn drive(&self, request: TurnRequest, sink: &EventSink) -> Result<TurnOutcome> {
        let session_id = request.session_id.clone();
        let _guard = self.locks.acquire(&session_id).await;

        let state = self.store.load(&session_id).await?;
        let mut turn = Turn::start(state, request);
        info!(
            session_id = %session_id,
            messages = turn.state.messages.len(),
            escalated = turn.state.is_escalated,
            "Turn started"
        );

        let ending = match self.run_phases(&mut turn, sink).await {
            Ok(ending) => ending,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Turn failed");
                turn.record_error(&e);
                if let Err(save_err) = self.store.save(&session_id, &turn.state).await {
                    warn!(session_id = %session_id, error = %save_err, "Failed to persist partial turn");
                }
                self.events.publish(DomainEvent::ErrorOccurred {
                    context: format!("turn for session {session_id}"),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };

        let reply = match ending {
            Ending::Handler(text) => text,
            Ending::Composed(text) => {
                turn.state.apply(StateUpdate::message(Message::assistant(&text)));
                sink.emit(DispatchEvent::Token { content: text.clone() }).await;
                text
            }
            Ending::ShortCircuit => {
                debug!(session_id = %session_id, "Session already escalated; automation bypassed");
                turn.audit(AuditEntry::now(AuditRecord::ShortCircuit));
                sink.emit(DispatchEvent::Token { content: ESCALATED_SESSION_REPLY.into() }).await;
                ESCALATED_SESSION_REPLY.to_string()
            }
            Ending::Abandoned => {
                turn.success = false;
                turn.anomaly("Turn abandoned by the caller".into());
                String::new()
            }
        };

        if !reply.is_empty() {
            turn.audit(AuditEntry::now(AuditRecord::Reply { text: reply.clone() }));
        }
        self.store.save(&session_id, &turn.state).await?;

        if turn.escalated {
            let reason = turn
                .state
                .escalation_detail
                .as_ref()
                .map(|d| d.reason.clone())
                .unwrap_or_default();
            info!(session_id = %session_id, reason = %reason, "Session escalated to a human");
            self.events.publish(DomainEvent::SessionEscalated {
                session_id: session_id.clone(),
                reason,
                timestamp: Utc::now(),
            });
        }
        self.events.publish(DomainEvent::TurnCompleted {
            session_id: session_id.clone(),
            intent: turn.state.current_intent,
            iterations: turn.iterations,
            is_escalated: turn.state.is_escalated,
            timestamp: Utc::now(),
        });
        info!(
            session_id = %session_id,
            intent = %turn.state.current_intent,
            iterations = turn.iterations,
            success = turn.success,
            "Turn completed"
        );

        Ok(TurnOutcome {
            success: turn.success,
            reply,
            intent_category: turn.state.current_intent,
            action_log: turn.action_log(),
            is_escalated: turn.state.is_escalated,
            iterations: turn.iterations,
            session_id,
        })
    }

    async fn run_phases(&self, turn: &mut Turn, sink: &EventSink) -> Result<Ending> {
        let mut phase = if turn.state.is_escalated {
            Phase::EscalatedDone
        } else {
            Phase::Routing
        };

        loop {
            phase = match phase {
                Phase::Routing => self.route(turn, sink).await?,
                Phase::Handling => self.handle(turn, sink).await?,
                Phase::AwaitingActions(requests) => self.plan(turn, requests)?,
                Phase::Executing(plan) => self.execute(turn, plan, sink).await,
                Phase::Done(ending) => return Ok(ending),
                Phase::EscalatedDone => return Ok(Ending::ShortCircuit),
                Phase::Abandoned => return Ok(Ending::Abandoned),
            };
        }
    }

    async fn route(&self, turn: &mut Turn, sink: &EventSink) -> Result<Phase> {
        let prior = turn.state.current_intent;
        let context = ClassifierContext {
            history: turn
                .state
                .recent_user_utterances(self.history_window)
                .into_iter()
                .map(String::from)
                .collect(),
            prior: (turn.had_history && prior != IntentCategory::Unclassified).then_some(prior),
        };

        let decision = self.classifier.classify(&turn.utterance, &context).await;
        debug!(
            session_id = %turn.state.session_id,
            category = %decision.category,
            confidence = decision.confidence,
            "Intent classified"
        );

        turn.state.apply(StateUpdate {
            current_intent: Some(decision.category),
            event_log: vec![AuditEntry::classification(&decision)],
            ..StateUpdate::default()
        });
        sink.emit(DispatchEvent::Classification {
            category: decision.category,
            confidence: decision.confidence,
            rationale: decision.rationale.clone(),
            source: decision.source,
        })
        .await;

        let handler = self.handlers.route(decision.category).ok_or_else(|| {
            Error::config(
                format!("No capability handler is registered for {}", decision.category),
                "Register a handler for this category or a default handler",
            )
        })?;
        turn.handler = Some(handler);
        Ok(Phase::Handling)
    }

    async fn handle(&self, turn: &mut Turn, sink: &EventSink) -> Result<Phase> {
        if sink.is_closed() {
            return Ok(Phase::Abandoned);
        }

        if turn.iterations >= self.max_iterations {
            turn.anomaly(format!(
                "Iteration cap of {} reached; ending turn",
                self.max_iterations
            ));
            if turn.state.is_escalated {
                return Ok(Phase::Done(Ending::Composed(escalated_reply(&turn.state))));
            }
            turn.success = false;
            return Ok(Phase::Done(Ending::Composed(ITERATION_CAP_REPLY.into())));
        }

        let handler = turn.handler()?;
        turn.iterations += 1;
        debug!(
            session_id = %turn.state.session_id,
            handler = handler.name(),
            iteration = turn.iterations,
            "Invoking handler"
        );

        let message = match handler.respond(&turn.state, sink).await {
            Ok(message) => message,
            Err(e) if e.kind() == ErrorKind::Configuration => return Err(e),
            Err(e) => {
                warn!(
                    session_id = %turn.state.session_id,
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
                turn.record_error(&e);
                turn.success = false;
                return Ok(Phase::Done(Ending::Composed(HANDLER_ERROR_REPLY.into())));
            }
        };

        if message.is_empty_reply() {
            turn.anomaly(format!("Handler {} returned an empty message", handler.name()));
            return Ok(Phase::Done(Ending::Composed(EMPTY_REPLY_FALLBACK.into())));
        }

        // After an escalating result the handler only gets to say goodbye.
        if turn.state.is_escalated {
            if !message.action_requests.is_empty() {
                turn.anomaly(format!(
                    "Handler {} requested {} action(s) after escalation; dropped",
                    handler.name(),
                    message.action_requests.len()
                ));
            }
            if message.content.trim().is_empty() {
                return Ok(Phase::Done(Ending::Composed(escalated_reply(&turn.state))));
            }
            let text = message.content;
            turn.state.apply(StateUpdate::message(Message::assistant(&text)));
            return Ok(Phase::Done(Ending::Handler(text)));
        }

        let requests = message.action_requests.clone();
        let text = message.content.clone();
        let audits = requests
            .iter()
            .map(|r| {
                AuditEntry::now(AuditRecord::ActionRequest {
                    request_id: r.id.clone(),
                    name: r.name.clone(),
                    payload: Value::Object(r.arguments.clone()),
                })
            })
            .collect();
        turn.state.apply(StateUpdate {
            messages: vec![message],
            event_log: audits,
            ..StateUpdate::default()
        });

        if requests.is_empty() {
            Ok(Phase::Done(Ending::Handler(text)))
        } else {
            Ok(Phase::AwaitingActions(requests))
        }
    }

    fn plan(&self, turn: &mut Turn, requests: Vec<ActionRequest>) -> Result<Phase> {
        let handler = turn.handler()?;
        let plan = requests
            .into_iter()
            .map(|request| {
                if handler.permits(&request.name) {
                    Planned::Run(request)
                } else {
                    warn!(
                        session_id = %turn.state.session_id,
                        handler = handler.name(),
                        action = %request.name,
                        "Action not permitted for handler"
                    );
                    let reason = format!(
                        "Action '{}' is not available to the {} handler",
                        request.name,
                        handler.name()
                    );
                    Planned::Reject(request, reason)
                }
            })
            .collect();
        Ok(Phase::Executing(plan))
    }

    async fn execute(&self, turn: &mut Turn, plan: Vec<Planned>, sink: &EventSink) -> Phase {
        let mut abandoned = false;
        let mut escalated = false;

        for step in plan {
            let execution = match step {
                Planned::Reject(request, reason) => Execution::rejected(&request, reason),
                Planned::Run(request) if abandoned || sink.is_closed() => {
                    abandoned = true;
                    Execution::rejected(&request, TURN_ABANDONED)
                }
                Planned::Run(request) => {
                    sink.emit(DispatchEvent::ActionStart {
                        request_id: request.id.clone(),
                        name: request.name.clone(),
                        arguments: request.arguments.clone(),
                    })
                    .await;
                    let execution = self.executor.execute(&turn.state.session_id, &request).await;
                    sink.emit(DispatchEvent::ActionEnd {
                        request_id: request.id.clone(),
                        name: request.name.clone(),
                        success: execution.result.is_success(),
                        payload: execution.result.to_envelope(),
                        duration_ms: execution.duration_ms,
                    })
                    .await;
                    execution
                }
            };
            escalated |= execution.escalated();
            turn.state.apply(execution.into_update());
        }

        turn.escalated |= escalated;
        if abandoned {
            Phase::Abandoned
        } else if escalated && self.escalation_policy == EscalationPolicy::HaltImmediately {
            Phase::Done(Ending::Composed(escalated_reply(&turn.state)))
        } else {
            Phase::Handling
        }
    }
}
