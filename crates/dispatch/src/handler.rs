//! Capability handlers and the routing table.
//!
//! A handler is bound to one intent category and a fixed set of actions.
//! Given the session state it produces exactly one assistant message:
//! reply text, or action requests (with optional text). The dispatch loop
//! enforces the rest.

use async_trait::async_trait;
use deskpilot_actions::catalog::{
    ORDER_MANAGEMENT_ACTIONS, RESOLUTION_ACTIONS, SALES_ACTIONS, SUBSCRIPTION_ACTIONS,
};
use deskpilot_core::action::{ActionRegistry, ESCALATION_ACTION};
use deskpilot_core::intent::IntentCategory;
use deskpilot_core::message::{Message, Role};
use deskpilot_core::policy::{PolicyProvider, format_policies};
use deskpilot_core::provider::{Provider, ProviderRequest};
use deskpilot_core::state::ConversationState;
use deskpilot_core::{ActionRequest, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::stream_event::{DispatchEvent, EventSink};

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> IntentCategory;

    /// Whether this handler may run `action`.
    fn permits(&self, action: &str) -> bool;

    /// Produce the next assistant message.
    ///
    /// Streaming handlers forward reply text to `sink` as `token` events.
    async fn respond(&self, state: &ConversationState, sink: &EventSink) -> Result<Message>;
}

const ORDER_MANAGEMENT_PERSONA: &str = "\
You are the order management specialist of an online store.
Handle shipping questions (\"where is my order?\") and order changes (cancellation, address change).
- Always check the current status with shopify_get_order_details before answering.
- DELIVERED but the customer says it never arrived: ask them to wait 24 hours, carriers often mark parcels early.
- IN_TRANSIT but late: apologise sincerely and share the tracking link.
- Cancel or change the address only while the order is unfulfilled. Once fulfilled, explain that and offer a return instead.
Be efficient, polite and concrete.";

const RESOLUTION_PERSONA: &str = "\
You are the resolution and refund specialist of an online store.
Solve problems with delivered orders (wrong item, missing item, product did not work) with empathy, preferring store credit over cash refunds.
Wrong or missing item: apologise, then offer in order: a free reshipment, store credit with a 10% bonus, a full refund as last resort.
Product did not work: check how it was used first. If used correctly, offer store credit with a bonus; refund only if they refuse.
Tag the outcome with shopify_add_tags (for example \"wrong_item_report\" or \"issue_resolved_credit\").";

const SUBSCRIPTION_PERSONA: &str = "\
You are the subscription retention specialist of an online store.
Manage subscription changes (status, skip, pause, resume, cancel) and try to keep the customer.
For cancellation requests follow this order strictly:
1. Too much product: offer to skip the next order.
2. Needs a break: offer to pause the subscription.
3. Still wants to cancel: offer a discount code (20% off the next two orders).
4. Only if they insist: cancel the subscription.
Negotiate politely; do not just execute commands.";

const SALES_PERSONA: &str = "\
You are the sales and product assistant of an online store.
Answer pre-purchase questions, fix discount code problems and respond to feedback.
- A code does not work: apologise and create a replacement with shopify_create_discount_code (for example 10% for 48 hours).
- Product questions: search shopify_get_related_knowledge_source and recommend with shopify_get_product_recommendations.
- Thanks or praise: be warm and ask whether they would leave a review.
- Questions unrelated to the store: answer briefly and steer back to how you can help.";

const ESCALATION_GUIDANCE: &str = "\
Hand the conversation to a human with escalate_to_human when the customer asks for a person, \
when a request is outside these rules, or when the available actions cannot resolve it. \
Give a reason code, a short message for the customer and a summary for the agent.";

/// A handler backed by a language model.
pub struct LlmHandler {
    name: String,
    category: IntentCategory,
    persona: String,
    actions: ActionRegistry,
    provider: Arc<dyn Provider>,
    policies: Arc<dyn PolicyProvider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl LlmHandler {
    pub fn new(
        name: impl Into<String>,
        category: IntentCategory,
        persona: impl Into<String>,
        actions: ActionRegistry,
        provider: Arc<dyn Provider>,
        policies: Arc<dyn PolicyProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            persona: persona.into(),
            actions,
            provider,
            policies,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.names().into_iter().map(String::from).collect()
    }

    /// Persona, dynamic rules, escalation guidance, customer context.
    pub async fn instructions(&self, state: &ConversationState) -> String {
        let rules = format_policies(&self.policies.active_policies().await);
        let mut text = format!(
            "{}\n\nDYNAMIC RULES (follow these strictly, they override the guidance above):\n{}\n\n{}",
            self.persona, rules, ESCALATION_GUIDANCE
        );
        if !state.customer_context.is_empty() {
            let context = serde_json::Value::Object(state.customer_context.clone());
            text.push_str(&format!("\n\nCustomer context: {context}"));
        }
        text
    }

    fn request(&self, system: String, state: &ConversationState, stream: bool) -> ProviderRequest {
        let mut messages = vec![Message::system(system)];
        messages.extend(
            state
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        let mut request = ProviderRequest::new(&self.model, messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.actions = self.actions.definitions();
        request.stream = stream;
        request
    }
}

#[async_trait]
impl CapabilityHandler for LlmHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> IntentCategory {
        self.category
    }

    fn permits(&self, action: &str) -> bool {
        self.actions.contains(action)
    }

    async fn respond(&self, state: &ConversationState, sink: &EventSink) -> Result<Message> {
        let system = self.instructions(state).await;
        debug!(handler = %self.name, messages = state.messages.len(), "Handler invoked");

        if !sink.is_streaming() {
            let response = self.provider.complete(self.request(system, state, false)).await?;
            return Ok(Message::assistant_with_actions(
                response.message.content,
                response.message.action_requests,
            ));
        }

        let mut rx = self.provider.stream(self.request(system, state, true)).await?;
        let mut content = String::new();
        let mut requests: Vec<ActionRequest> = Vec::new();

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                content.push_str(&text);
                sink.emit(DispatchEvent::Token { content: text }).await;
            }
            requests.extend(chunk.action_requests);
            if chunk.done {
                break;
            }
        }

        Ok(Message::assistant_with_actions(content, requests))
    }
}

/// Name, category, persona and action group of each store handler.
const STANDARD_ROUTES: [(&str, IntentCategory, &str, &[&str]); 4] = [
    ("order_management", IntentCategory::OrderManagement, ORDER_MANAGEMENT_PERSONA, ORDER_MANAGEMENT_ACTIONS),
    ("resolution_refund", IntentCategory::ResolutionRefund, RESOLUTION_PERSONA, RESOLUTION_ACTIONS),
    ("subscription_retention", IntentCategory::SubscriptionRetention, SUBSCRIPTION_PERSONA, SUBSCRIPTION_ACTIONS),
    ("sales_product", IntentCategory::SalesProduct, SALES_PERSONA, SALES_ACTIONS),
];

fn with_escalation(actions: &[&'static str]) -> Vec<&'static str> {
    let mut names = actions.to_vec();
    names.push(ESCALATION_ACTION);
    names
}

/// The action names each standard handler may run, for the router prompt.
pub fn standard_capabilities() -> Vec<(IntentCategory, Vec<String>)> {
    STANDARD_ROUTES
        .iter()
        .map(|(_, category, _, actions)| {
            let names = with_escalation(actions).into_iter().map(String::from).collect();
            (*category, names)
        })
        .collect()
}

/// Static mapping from intent category to handler.
#[derive(Clone)]
pub struct HandlerSet {
    handlers: HashMap<IntentCategory, Arc<dyn CapabilityHandler>>,
    default_category: IntentCategory,
}

impl HandlerSet {
    /// An empty set whose unmapped categories go to `default_category`.
    pub fn new(default_category: IntentCategory) -> Self {
        Self {
            handlers: HashMap::new(),
            default_category,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.handlers.insert(handler.category(), handler);
        self
    }

    /// The four store handlers. The catch-all category routes to sales,
    /// the informational handler with the fewest destructive actions.
    pub fn standard(
        registry: &ActionRegistry,
        provider: Arc<dyn Provider>,
        policies: Arc<dyn PolicyProvider>,
        config: &deskpilot_config::AppConfig,
    ) -> Self {
        let mut set = Self::new(IntentCategory::SalesProduct);
        for (name, category, persona, actions) in STANDARD_ROUTES {
            let handler = LlmHandler::new(
                name,
                category,
                persona,
                registry.subset(&with_escalation(actions)),
                provider.clone(),
                policies.clone(),
                &config.default_model,
            )
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens);
            set = set.with_handler(Arc::new(handler));
        }
        set
    }

    /// The handler for `category`, or the default handler.
    pub fn route(&self, category: IntentCategory) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers
            .get(&category)
            .or_else(|| self.handlers.get(&self.default_category))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
