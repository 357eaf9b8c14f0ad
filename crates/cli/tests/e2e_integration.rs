//! End-to-end integration tests for the deskpilot dispatcher.
//!
//! These tests wire the real classifier, the four store handlers, the
//! action catalog over the in-process mock backend, and the in-memory
//! session store, with only the language model scripted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use deskpilot_actions::{MockBackend, default_registry};
use deskpilot_config::{AppConfig, EscalationPolicy};
use deskpilot_core::error::ProviderError;
use deskpilot_core::intent::{DecisionSource, IntentCategory};
use deskpilot_core::message::{Message, Role};
use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use deskpilot_core::{ActionRequest, SessionStore, StaticPolicies};
use deskpilot_dispatch::{DispatchEvent, Dispatcher, ESCALATED_SESSION_REPLY, TurnRequest};
use deskpilot_sessions::InMemorySessionStore;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
///
/// Once the script runs out the last response repeats, which is how a
/// pathological handler that never stops asking for actions looks.
struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    last: Mutex<Option<ProviderResponse>>,
    call_count: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            call_count: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.call_count.lock().unwrap() += 1;
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            *last = Some(next);
        }
        last.clone().ok_or_else(|| ProviderError::ApiError {
            status_code: 500,
            message: "empty script".into(),
        })
    }
}

fn text_response(text: &str) -> ProviderResponse {
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

fn action_response(calls: &[(&str, Value)]) -> ProviderResponse {
    let requests = calls
        .iter()
        .map(|(name, args)| ActionRequest::new(*name, args.as_object().cloned().unwrap_or_default()))
        .collect();
    ProviderResponse {
        message: Message::assistant_with_actions("", requests),
        usage: None,
        model: "mock-model".into(),
    }
}

fn verdict(intent: &str, confidence: f32) -> ProviderResponse {
    text_response(&json!({ "intent": intent, "confidence": confidence, "reason": "scripted" }).to_string())
}

fn escalation_args() -> Value {
    json!({
        "reason": "CUSTOMER_REQUEST",
        "customerMessage": "I'm connecting you with a member of our team now.",
        "internalSummary": "Customer asked for a human after an order status check."
    })
}

fn build(provider: Arc<ScriptedProvider>) -> (Dispatcher, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let dispatcher = Dispatcher::from_config(
        &AppConfig::default(),
        provider,
        default_registry(Arc::new(MockBackend::new())),
        store.clone(),
        Arc::new(StaticPolicies::default()),
    );
    (dispatcher, store)
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn order_status_then_escalation_then_short_circuit() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        // Turn 1: where is my order
        verdict("ORDER_MANAGEMENT", 0.95),
        action_response(&[("shopify_get_order_details", json!({ "orderId": "1001" }))]),
        text_response("Good news! Order #1001 is in transit and on its way to you."),
        // Turn 2: ask for a person
        verdict("OTHER", 0.7),
        action_response(&[("escalate_to_human", escalation_args())]),
        text_response("A member of our team will be with you shortly."),
    ]));
    let (dispatcher, store) = build(provider.clone());

    // Scenario A
    let a = dispatcher
        .run_turn(TurnRequest::new("s-e2e", "Where is my order #1001?"))
        .await
        .unwrap();
    assert!(a.success);
    assert_eq!(a.intent_category, IntentCategory::OrderManagement);
    assert!(a.reply.contains("in transit"));
    assert!(!a.is_escalated);
    assert_eq!(a.iterations, 2);
    assert_eq!(a.action_log.len(), 2);
    assert_eq!(a.action_log[0].kind, "action_request");
    assert_eq!(a.action_log[0].payload["orderId"], "1001");
    assert_eq!(a.action_log[1].kind, "action_result");
    assert_eq!(a.action_log[1].payload["success"], true);
    assert_eq!(a.action_log[1].payload["data"]["status"], "IN_TRANSIT");

    // Scenario B
    let b = dispatcher
        .run_turn(TurnRequest::new("s-e2e", "I want to speak to a human"))
        .await
        .unwrap();
    assert!(b.is_escalated);
    assert_eq!(b.reply, "A member of our team will be with you shortly.");
    let detail = store.get("s-e2e").await.unwrap().unwrap().escalation_detail.unwrap();
    assert_eq!(detail.reason, "CUSTOMER_REQUEST");
    assert_eq!(provider.calls(), 6);

    // Scenario B'
    let c = dispatcher.run_turn(TurnRequest::new("s-e2e", "hello?")).await.unwrap();
    assert_eq!(c.reply, ESCALATED_SESSION_REPLY);
    assert!(c.is_escalated);
    assert!(c.action_log.is_empty());
    assert_eq!(c.iterations, 0);
    assert_eq!(provider.calls(), 6, "no model call once a human owns the session");

    let state = store.get("s-e2e").await.unwrap().unwrap();
    assert_eq!(state.messages.last().unwrap().role, Role::User);
    assert_eq!(state.messages.last().unwrap().content, "hello?");
}

#[tokio::test]
async fn bare_cancel_falls_back_to_order_management() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        text_response("I think the customer wants to cancel something."),
        text_response("Which order would you like to cancel?"),
    ]));
    let (dispatcher, _) = build(provider);

    let mut rx = dispatcher.run_stream(TurnRequest::new("s-cancel", "cancel"));
    let first = rx.recv().await.unwrap();
    match first {
        DispatchEvent::Classification {
            category,
            confidence,
            source,
            ..
        } => {
            assert_eq!(category, IntentCategory::OrderManagement);
            assert!((0.5..=0.6).contains(&confidence), "confidence {confidence}");
            assert_eq!(source, DecisionSource::Fallback);
        }
        other => panic!("expected classification first, got {}", other.event_type()),
    }

    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event);
    }
    match last {
        Some(DispatchEvent::Done(outcome)) => {
            assert!(outcome.success);
            assert_eq!(outcome.reply, "Which order would you like to cancel?");
        }
        other => panic!("expected a done event, got {:?}", other.map(|e| e.event_type())),
    }
}

// ── Properties ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pathological_handler_is_bounded_by_iteration_cap() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("ORDER_MANAGEMENT", 0.9),
        action_response(&[("shopify_get_order_details", json!({ "orderId": "1001" }))]),
    ]));
    let (dispatcher, _) = build(provider);
    let dispatcher = dispatcher.with_max_iterations(4);

    let outcome = dispatcher
        .run_turn(TurnRequest::new("s-loop", "where is 1001"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.iterations, 4);
    assert!(!outcome.reply.is_empty());
    assert_eq!(
        outcome.action_log.iter().filter(|e| e.kind == "action_result").count(),
        4
    );
}

#[tokio::test]
async fn one_failing_action_does_not_stop_the_batch() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("ORDER_MANAGEMENT", 0.9),
        action_response(&[
            ("shopify_get_order_details", json!({ "orderId": "4242" })),
            ("shopify_get_order_details", json!({ "orderId": "1001" })),
        ]),
        text_response("I couldn't find 4242, but 1001 is in transit."),
    ]));
    let (dispatcher, _) = build(provider);

    let outcome = dispatcher
        .run_turn(TurnRequest::new("s-batch", "check 4242 and 1001"))
        .await
        .unwrap();
    let results: Vec<_> = outcome
        .action_log
        .iter()
        .filter(|e| e.kind == "action_result")
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].payload["success"], false);
    assert!(results[0].payload["error"].as_str().unwrap().contains("4242"));
    assert_eq!(results[1].payload["success"], true);
    assert!(outcome.success);
}

#[tokio::test]
async fn transcript_only_grows_across_turns() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("SALES_PRODUCT", 0.8),
        text_response("Hi! How can I help?"),
        verdict("ORDER_MANAGEMENT", 0.9),
        action_response(&[("shopify_get_order_details", json!({ "orderId": "1001" }))]),
        text_response("It's in transit."),
    ]));
    let (dispatcher, store) = build(provider);

    dispatcher.run_turn(TurnRequest::new("s-grow", "hello")).await.unwrap();
    let before = store.get("s-grow").await.unwrap().unwrap().messages;

    dispatcher
        .run_turn(TurnRequest::new("s-grow", "where is 1001"))
        .await
        .unwrap();
    let after = store.get("s-grow").await.unwrap().unwrap().messages;

    assert!(after.len() > before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.content, new.content);
    }
}

#[tokio::test]
async fn halt_immediately_skips_the_goodbye_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("RESOLUTION_REFUND", 0.9),
        action_response(&[("escalate_to_human", escalation_args())]),
    ]));
    let (dispatcher, _) = build(provider.clone());
    let dispatcher = dispatcher.with_escalation_policy(EscalationPolicy::HaltImmediately);

    let outcome = dispatcher
        .run_turn(TurnRequest::new("s-halt", "get me a person"))
        .await
        .unwrap();
    assert!(outcome.is_escalated);
    assert_eq!(outcome.reply, "I'm connecting you with a member of our team now.");
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn streaming_events_arrive_in_generation_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("ORDER_MANAGEMENT", 0.9),
        action_response(&[("shopify_get_order_details", json!({ "orderId": "1001" }))]),
        text_response("It's in transit."),
    ]));
    let (dispatcher, _) = build(provider);

    let mut rx = dispatcher.run_stream(TurnRequest::new("s-order", "where is 1001"));
    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(event.event_type());
    }
    assert_eq!(
        kinds,
        vec!["classification", "action_start", "action_end", "token", "done"]
    );
}

// ── Surfaces ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn gateway_serves_a_full_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        verdict("ORDER_MANAGEMENT", 0.9),
        action_response(&[("shopify_get_order_details", json!({ "orderId": "1001" }))]),
        text_response("Order #1001 is in transit."),
    ]));
    let (dispatcher, _) = build(provider);
    let app = deskpilot_gateway::build_router(Arc::new(deskpilot_gateway::GatewayState::new(dispatcher)));

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"sessionId":"s-http","utterance":"Where is my order #1001?"}"#))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["intentCategory"], "ORDER_MANAGEMENT");
    assert_eq!(json["isEscalated"], false);
    assert_eq!(json["actionLog"][1]["kind"], "action_result");

    let req = Request::builder()
        .uri("/v1/sessions/s-http")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["currentIntent"], "ORDER_MANAGEMENT");
}

#[test]
fn default_config_template_parses() {
    let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
    assert_eq!(parsed.dispatch.escalation_policy, EscalationPolicy::LetHandlerFinish);
    assert_eq!(parsed.gateway.port, 3000);
}
