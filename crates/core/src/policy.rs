//! PolicyProvider trait: externally managed rules merged into handler
//! instructions at call time.
//!
//! The dispatcher only reads rules. Who writes them, and where they live,
//! is the provider's business.

use async_trait::async_trait;

/// Text shown to handlers when no rule is active.
pub const NO_POLICIES: &str = "No dynamic rules configured.";

#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// The currently active rules, in display order.
    ///
    /// A provider that cannot read its source returns an empty list.
    async fn active_policies(&self) -> Vec<String>;
}

/// A fixed list of rules.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicies(pub Vec<String>);

#[async_trait]
impl PolicyProvider for StaticPolicies {
    async fn active_policies(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Render rules as a numbered list for a prompt.
pub fn format_policies(policies: &[String]) -> String {
    if policies.is_empty() {
        return NO_POLICIES.to_string();
    }
    policies
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("{}. {}", i + 1, rule))
        .collect::<Vec<_>>()
        .join("\n")
}
