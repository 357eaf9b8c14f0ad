//! Shared test helpers for dispatch tests.

use async_trait::async_trait;
use deskpilot_core::action::{Action, ActionRequest};
use deskpilot_core::error::{ActionError, ProviderError};
use deskpilot_core::intent::IntentCategory;
use deskpilot_core::message::Message;
use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use deskpilot_core::state::ConversationState;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::handler::CapabilityHandler;
use crate::stream_event::{DispatchEvent, EventSink};

/// A provider that returns scripted responses in order.
///
/// Once the script runs out every call fails with an API error.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    failure: Option<ProviderError>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    /// Every call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_action_response(name: &str, args: Value) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_actions("", vec![request(name, args)]),
        usage: None,
        model: "mock-model".into(),
    }
}

pub fn request(name: &str, args: Value) -> ActionRequest {
    ActionRequest::new(name, args.as_object().cloned().unwrap_or_default())
}

/// A handler that replays scripted messages, repeating the last one.
pub struct ScriptedHandler {
    category: IntentCategory,
    script: Mutex<VecDeque<Message>>,
    last: Mutex<Option<Message>>,
    permitted: Option<Vec<String>>,
    failure: Option<fn() -> deskpilot_core::Error>,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(category: IntentCategory, script: Vec<Message>) -> Self {
        Self {
            category,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            permitted: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with the error `make` builds.
    pub fn failing(category: IntentCategory, make: fn() -> deskpilot_core::Error) -> Self {
        Self {
            failure: Some(make),
            ..Self::new(category, Vec::new())
        }
    }

    /// Restrict the actions this handler may run.
    pub fn permitting(mut self, names: &[&str]) -> Self {
        self.permitted = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    fn category(&self) -> IntentCategory {
        self.category
    }

    fn permits(&self, action: &str) -> bool {
        self.permitted
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == action))
    }

    async fn respond(&self, _state: &ConversationState, sink: &EventSink) -> deskpilot_core::Result<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = self.failure {
            return Err(make());
        }
        let next = self.script.lock().unwrap().pop_front();
        let message = match next {
            Some(m) => {
                *self.last.lock().unwrap() = Some(m.clone());
                m
            }
            None => self.last.lock().unwrap().clone().unwrap_or_else(|| Message::assistant("")),
        };
        // Fresh request ids on every replay.
        let message = Message::assistant_with_actions(
            message.content,
            message
                .action_requests
                .into_iter()
                .map(|r| ActionRequest::new(r.name, r.arguments))
                .collect(),
        );
        if !message.content.is_empty() {
            sink.emit(DispatchEvent::Token { content: message.content.clone() }).await;
        }
        Ok(message)
    }
}

/// An action that counts its executions.
pub struct CountingAction {
    name: String,
    outcome: Result<Value, String>,
    calls: AtomicUsize,
}

impl CountingAction {
    pub fn ok(name: &str, data: Value) -> Self {
        Self { name: name.into(), outcome: Ok(data), calls: AtomicUsize::new(0) }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self { name: name.into(), outcome: Err(error.into()), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "counts calls"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map_err(ActionError::Backend)
    }
}
