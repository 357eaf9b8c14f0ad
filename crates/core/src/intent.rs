//! Intent categories and classifier decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of intent categories, one per capability handler plus a
/// catch-all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentCategory {
    /// Order status, tracking, address changes, order cancellation
    OrderManagement,
    /// Refunds, returns, store credit, wrong/damaged/missing items
    ResolutionRefund,
    /// Subscription status, skip, pause, cancel
    SubscriptionRetention,
    /// Product questions, recommendations, discounts, general chat
    SalesProduct,
    /// Nothing matched
    #[default]
    #[serde(rename = "OTHER", alias = "UNCLASSIFIED")]
    Unclassified,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 5] = [
        Self::OrderManagement,
        Self::ResolutionRefund,
        Self::SubscriptionRetention,
        Self::SalesProduct,
        Self::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderManagement => "ORDER_MANAGEMENT",
            Self::ResolutionRefund => "RESOLUTION_REFUND",
            Self::SubscriptionRetention => "SUBSCRIPTION_RETENTION",
            Self::SalesProduct => "SALES_PRODUCT",
            Self::Unclassified => "OTHER",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORDER_MANAGEMENT" => Ok(Self::OrderManagement),
            "RESOLUTION_REFUND" => Ok(Self::ResolutionRefund),
            "SUBSCRIPTION_RETENTION" => Ok(Self::SubscriptionRetention),
            "SALES_PRODUCT" => Ok(Self::SalesProduct),
            "OTHER" | "UNCLASSIFIED" => Ok(Self::Unclassified),
            other => Err(format!("unknown intent category: {other}")),
        }
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Parsed and validated language-model output
    Model,
    /// Deterministic keyword matcher
    Fallback,
}

/// A classifier verdict for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub category: IntentCategory,

    /// In `[0, 1]`
    pub confidence: f32,

    /// Short rationale
    pub rationale: String,

    pub source: DecisionSource,
}

impl IntentDecision {
    pub fn fallback(category: IntentCategory, confidence: f32, rationale: impl Into<String>) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            source: DecisionSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_use_wire_names() {
        let json = serde_json::to_string(&IntentCategory::OrderManagement).unwrap();
        assert_eq!(json, "\"ORDER_MANAGEMENT\"");
        let json = serde_json::to_string(&IntentCategory::Unclassified).unwrap();
        assert_eq!(json, "\"OTHER\"");
    }

    #[test]
    fn unclassified_accepts_alias() {
        let c: IntentCategory = serde_json::from_str("\"UNCLASSIFIED\"").unwrap();
        assert_eq!(c, IntentCategory::Unclassified);
        assert_eq!("other".parse::<IntentCategory>().unwrap(), IntentCategory::Unclassified);
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!("BILLING".parse::<IntentCategory>().is_err());
        for c in IntentCategory::ALL {
            assert_eq!(c.as_str().parse::<IntentCategory>().unwrap(), c);
        }
    }

    #[test]
    fn fallback_clamps_confidence() {
        let d = IntentDecision::fallback(IntentCategory::SalesProduct, 1.7, "greeting");
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.source, DecisionSource::Fallback);
    }
}
