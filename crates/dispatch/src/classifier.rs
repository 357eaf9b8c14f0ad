//! Intent classification.
//!
//! Two tiers: [`LlmClassifier`] asks a language model for a JSON verdict and
//! validates it; anything it cannot use (provider failure, prose, missing
//! fields, out-of-range confidence) degrades to [`KeywordClassifier`]. The
//! classifier therefore always produces a decision.

use async_trait::async_trait;
use deskpilot_core::intent::{DecisionSource, IntentCategory, IntentDecision};
use deskpilot_core::message::Message;
use deskpilot_core::provider::{Provider, ProviderRequest};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// What the classifier knows beyond the utterance itself.
#[derive(Debug, Clone, Default)]
pub struct ClassifierContext {
    /// Earlier user utterances, oldest first
    pub history: Vec<String>,
    /// Category of the previous turn, if there was one
    pub prior: Option<IntentCategory>,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify the latest utterance. Never fails.
    async fn classify(&self, utterance: &str, context: &ClassifierContext) -> IntentDecision;
}

// ── Keyword fallback ──────────────────────────────────────────────────────

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("classifier pattern is a valid regex")
}

static SUBSCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(subscriptions?|subscribed|skio|skip (my |the )?next|pause|unpause|resume|billing|renewal|abonelik)")
});
static RESOLUTION: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(refund|return|wrong (item|product|size|color)|damaged|broken|missing|defective|store credit|didn'?t work|not working|iade)")
});
static ORDER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(\bwhere('?s| is) my (order|package|parcel)|\btrack(ing)?\b|\border status|\bshipping address|\bchange (my |the )?address|\bdeliver(y|ed)\b|\bshipped\b|\bcancel (my |the |this )?order|\bsipari|#\d{3,})")
});
static SALES: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(products?|recommend|suggest|discount|promo|coupon|ingredients?|how (do i|to) use|price|buy|thanks|thank you|love it|hello|hi|hey)\b")
});
static CANCEL: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(cancel|iptal)"));
static FOLLOW_UP: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)^\s*(#?\d+|yes|yeah|yep|no|nope|ok|okay|sure|please|that one)\W*$")
});
static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| re(r"^\s*#?\d+\s*$"));

/// Deterministic keyword matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn decide(&self, utterance: &str, context: &ClassifierContext) -> IntentDecision {
        use IntentCategory::*;

        // A short reply to the previous question ("yes", "#1001") stays with
        // the category that asked it, ahead of any keyword tier.
        let follow_up = utterance.split_whitespace().count() <= 3 && FOLLOW_UP.is_match(utterance);
        if let Some(prior) = context.prior.filter(|p| follow_up && *p != Unclassified) {
            return IntentDecision::fallback(prior, 0.6, "short follow-up, keeping previous intent");
        }

        if SUBSCRIPTION.is_match(utterance) {
            return IntentDecision::fallback(SubscriptionRetention, 0.8, "subscription keywords");
        }
        if RESOLUTION.is_match(utterance) {
            return IntentDecision::fallback(ResolutionRefund, 0.8, "refund or item-problem keywords");
        }
        if ORDER.is_match(utterance) {
            return IntentDecision::fallback(OrderManagement, 0.8, "order tracking or change keywords");
        }
        if SALES.is_match(utterance) {
            return IntentDecision::fallback(SalesProduct, 0.7, "product, discount or greeting keywords");
        }
        if CANCEL.is_match(utterance) {
            return IntentDecision::fallback(
                OrderManagement,
                0.55,
                "cancellation without an object defaults to orders",
            );
        }

        if follow_up && BARE_NUMBER.is_match(utterance) {
            return IntentDecision::fallback(OrderManagement, 0.5, "bare number read as an order id");
        }

        IntentDecision::fallback(Unclassified, 0.3, "no keyword matched")
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, utterance: &str, context: &ClassifierContext) -> IntentDecision {
        self.decide(utterance, context)
    }
}

// ── Language-model classifier ─────────────────────────────────────────────

/// Asks a model, validates, falls back to keywords.
pub struct LlmClassifier {
    provider: Arc<dyn Provider>,
    model: String,
    /// Action names each category's handler can use
    capabilities: Vec<(IntentCategory, Vec<String>)>,
    fallback: KeywordClassifier,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            capabilities: Vec::new(),
            fallback: KeywordClassifier,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<(IntentCategory, Vec<String>)>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The system prompt for the router model.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are the router of an e-commerce customer-support assistant. Decide which \
             specialist should handle the customer's latest message. Each specialist is \
             defined by the actions it can take; pick the one whose actions solve the problem.\n",
        );

        for (category, actions) in &self.capabilities {
            prompt.push_str(&format!("\n## {category}\n{}\n", category_summary(*category)));
            if !actions.is_empty() {
                prompt.push_str("Actions:\n");
                for action in actions {
                    prompt.push_str(&format!("- {action}\n"));
                }
            }
        }

        prompt.push_str(
            "\n## Rules\n\
             1. \"Cancel my order\" goes to ORDER_MANAGEMENT; \"cancel my subscription\" goes to \
             SUBSCRIPTION_RETENTION. A bare \"cancel\" with no object goes to ORDER_MANAGEMENT.\n\
             2. Problems before delivery (tracking, cancel, address) are ORDER_MANAGEMENT; problems \
             after delivery (wrong item, broken, refund) are RESOLUTION_REFUND.\n\
             3. Short follow-ups (an order number, \"yes\", \"ok\") continue the previous topic: \
             use the previous intent unless the message clearly starts a new one.\n\
             4. Messages unrelated to the store go to OTHER.\n\
             5. Customers may write in any language.\n\
             \n## Output\n\
             Return ONLY a JSON object, no text around it:\n\
             {\"intent\": \"ORDER_MANAGEMENT\" | \"RESOLUTION_REFUND\" | \"SUBSCRIPTION_RETENTION\" | \
             \"SALES_PRODUCT\" | \"OTHER\", \"confidence\": 0.0-1.0, \"reason\": \"short explanation\"}",
        );
        prompt
    }

    fn user_prompt(utterance: &str, context: &ClassifierContext) -> String {
        let mut text = String::new();
        if !context.history.is_empty() {
            text.push_str("Conversation so far (customer messages):\n");
            for (i, line) in context.history.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, line));
            }
        }
        if let Some(prior) = context.prior {
            text.push_str(&format!("Previous intent: {prior}\n"));
        }
        text.push_str(&format!("Customer message: \"{utterance}\""));
        text
    }
}

fn category_summary(category: IntentCategory) -> &'static str {
    match category {
        IntentCategory::OrderManagement => {
            "Order tracking, order status, shipping address changes and cancelling unfulfilled orders."
        }
        IntentCategory::ResolutionRefund => {
            "Wrong, missing or defective items, refunds, returns and store credit after delivery."
        }
        IntentCategory::SubscriptionRetention => {
            "Subscription status, skipping, pausing, resuming and cancelling subscriptions."
        }
        IntentCategory::SalesProduct => {
            "Product questions, recommendations, discount codes, thanks and general pre-purchase chat."
        }
        IntentCategory::Unclassified => "Anything unrelated to the store.",
    }
}

/// The first balanced `{...}` span, ignoring braces inside strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a model verdict.
pub fn parse_decision(text: &str) -> Result<IntentDecision, String> {
    let span = first_json_object(text).ok_or("no JSON object in response")?;
    let value: Value = serde_json::from_str(span).map_err(|e| format!("invalid JSON: {e}"))?;

    let category = value
        .get("intent")
        .or_else(|| value.get("category"))
        .and_then(Value::as_str)
        .ok_or("missing intent")?
        .parse::<IntentCategory>()?;

    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or("missing numeric confidence")?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {confidence} outside [0, 1]"));
    }

    let rationale = value
        .get("reason")
        .or_else(|| value.get("rationale"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or("missing reason")?;

    Ok(IntentDecision {
        category,
        confidence: confidence as f32,
        rationale: rationale.to_string(),
        source: DecisionSource::Model,
    })
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, utterance: &str, context: &ClassifierContext) -> IntentDecision {
        let mut request = ProviderRequest::new(
            &self.model,
            vec![
                Message::system(self.system_prompt()),
                Message::user(Self::user_prompt(utterance, context)),
            ],
        );
        request.temperature = 0.0;
        request.max_tokens = Some(200);

        let content = match self.provider.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(error = %e, "Classifier model unavailable, using keyword fallback");
                return self.fallback.decide(utterance, context);
            }
        };

        match parse_decision(&content) {
            Ok(decision) => {
                debug!(category = %decision.category, confidence = decision.confidence, "Model classification");
                decision
            }
            Err(reason) => {
                warn!(reason = %reason, "Unusable classifier output, using keyword fallback");
                self.fallback.decide(utterance, context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use deskpilot_core::error::ProviderError;

    fn none() -> ClassifierContext {
        ClassifierContext::default()
    }

    #[test]
    fn keywords_cover_each_category() {
        let k = KeywordClassifier;
        let cases = [
            ("Where is my order #1001?", IntentCategory::OrderManagement),
            ("I got the wrong item", IntentCategory::ResolutionRefund),
            ("please pause my subscription", IntentCategory::SubscriptionRetention),
            ("can you recommend a product for sleep", IntentCategory::SalesProduct),
            ("what is the capital of France", IntentCategory::Unclassified),
        ];
        for (text, expected) in cases {
            assert_eq!(k.decide(text, &none()).category, expected, "{text}");
        }
    }

    #[test]
    fn bare_cancel_defaults_to_orders() {
        let d = KeywordClassifier.decide("cancel", &none());
        assert_eq!(d.category, IntentCategory::OrderManagement);
        assert!((0.5..=0.6).contains(&d.confidence));

        let d = KeywordClassifier.decide("cancel my subscription", &none());
        assert_eq!(d.category, IntentCategory::SubscriptionRetention);
    }

    #[test]
    fn follow_up_keeps_prior_intent() {
        let ctx = ClassifierContext {
            history: vec!["I want to skip my next box".into()],
            prior: Some(IntentCategory::SubscriptionRetention),
        };
        let d = KeywordClassifier.decide("yes", &ctx);
        assert_eq!(d.category, IntentCategory::SubscriptionRetention);

        let d = KeywordClassifier.decide("1001", &none());
        assert_eq!(d.category, IntentCategory::OrderManagement);
        assert_eq!(KeywordClassifier.decide("yes", &none()).category, IntentCategory::Unclassified);
    }

    #[test]
    fn hashed_order_number_follows_the_prior_intent() {
        let ctx = ClassifierContext {
            history: vec!["my blender arrived broken".into()],
            prior: Some(IntentCategory::ResolutionRefund),
        };
        let hashed = KeywordClassifier.decide("#1001", &ctx);
        let plain = KeywordClassifier.decide("1001", &ctx);
        assert_eq!(hashed.category, IntentCategory::ResolutionRefund);
        assert_eq!(plain.category, IntentCategory::ResolutionRefund);

        // Without a prior the hashed number is still an order reference.
        assert_eq!(KeywordClassifier.decide("#1001", &none()).category, IntentCategory::OrderManagement);
    }

    #[test]
    fn balanced_span_skips_braces_in_strings() {
        let text = r#"Sure! {"intent":"OTHER","reason":"a } brace","confidence":0.4} trailing {x}"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"intent":"OTHER","reason":"a } brace","confidence":0.4}"#)
        );
        assert!(first_json_object("{ never closed").is_none());
    }

    #[test]
    fn parse_rejects_bad_verdicts() {
        assert!(parse_decision("no json here").is_err());
        assert!(parse_decision(r#"{"intent":"BILLING","confidence":0.9,"reason":"x"}"#).is_err());
        assert!(parse_decision(r#"{"intent":"OTHER","confidence":1.5,"reason":"x"}"#).is_err());
        assert!(parse_decision(r#"{"intent":"OTHER","confidence":"high","reason":"x"}"#).is_err());
        assert!(parse_decision(r#"{"intent":"OTHER","confidence":0.5,"reason":""}"#).is_err());

        let d = parse_decision(r#"```json {"intent":"SALES_PRODUCT","confidence":0.9,"reason":"greeting"} ```"#).unwrap();
        assert_eq!(d.category, IntentCategory::SalesProduct);
        assert_eq!(d.source, DecisionSource::Model);
    }

    #[tokio::test]
    async fn model_verdict_is_used() {
        let provider = Arc::new(ScriptedProvider::texts(&[
            r#"{"intent":"RESOLUTION_REFUND","confidence":0.92,"reason":"damaged item"}"#,
        ]));
        let classifier = LlmClassifier::new(provider, "m");
        let d = classifier.classify("my patch arrived torn", &none()).await;
        assert_eq!(d.category, IntentCategory::ResolutionRefund);
        assert_eq!(d.source, DecisionSource::Model);
    }

    #[tokio::test]
    async fn malformed_output_never_fails() {
        for garbage in [
            "I think this is about orders.",
            r#"{"intent":"ORDER_MANAGEMENT"}"#,
            r#"{"intent":"ORDER_MANAGEMENT","confidence":7,"reason":"x"}"#,
            "",
        ] {
            let classifier = LlmClassifier::new(Arc::new(ScriptedProvider::texts(&[garbage])), "m");
            let d = classifier.classify("Where is my order #1001?", &none()).await;
            assert_eq!(d.source, DecisionSource::Fallback);
            assert_eq!(d.category, IntentCategory::OrderManagement);
        }
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::Network("down".into())));
        let classifier = LlmClassifier::new(provider, "m");
        let d = classifier.classify("cancel", &none()).await;
        assert_eq!(d.category, IntentCategory::OrderManagement);
        assert_eq!(d.source, DecisionSource::Fallback);
    }

    #[test]
    fn prompt_lists_capabilities_and_rules() {
        let classifier = LlmClassifier::new(Arc::new(ScriptedProvider::texts(&[])), "m")
            .with_capabilities(vec![(
                IntentCategory::SubscriptionRetention,
                vec!["skio_pause_subscription".into()],
            )]);
        let prompt = classifier.system_prompt();
        assert!(prompt.contains("## SUBSCRIPTION_RETENTION"));
        assert!(prompt.contains("- skio_pause_subscription"));
        assert!(prompt.contains("bare \"cancel\""));

        let user = LlmClassifier::user_prompt(
            "yes",
            &ClassifierContext { history: vec!["skip my box".into()], prior: Some(IntentCategory::SubscriptionRetention) },
        );
        assert!(user.contains("1. skip my box"));
        assert!(user.contains("Previous intent: SUBSCRIPTION_RETENTION"));
    }
}
