//! File-backed dynamic rules.
//!
//! The rules file is owned by whatever admin tooling writes it; here it is
//! only read, on every handler call, so edits apply to the next turn without
//! a restart. Format:
//!
//! ```json
//! { "rules": [ { "id": "r1", "rule": "…", "createdAt": "…", "isActive": true } ],
//!   "updatedAt": "…" }
//! ```

use async_trait::async_trait;
use deskpilot_core::{PolicyProvider, StaticPolicies};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::AppConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRule {
    pub id: String,
    pub rule: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesFile {
    #[serde(default)]
    pub rules: Vec<StoredRule>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RulesFile {
    /// Rule texts of active, non-blank rules in file order.
    pub fn active(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|r| r.is_active && !r.rule.trim().is_empty())
            .map(|r| r.rule.clone())
            .collect()
    }
}

/// Reads the rules file on every call.
pub struct FileRules {
    path: PathBuf,
}

impl FileRules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicyProvider for FileRules {
    async fn active_policies(&self) -> Vec<String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Rules file not readable");
                return Vec::new();
            }
        };
        match serde_json::from_str::<RulesFile>(&content) {
            Ok(file) => file.active(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring malformed rules file");
                Vec::new()
            }
        }
    }
}

/// Build the policy provider described by the configuration.
pub fn policy_provider(config: &AppConfig) -> Arc<dyn PolicyProvider> {
    match &config.policies.rules_file {
        Some(path) => Arc::new(FileRules::new(path)),
        None => Arc::new(StaticPolicies(config.policies.rules.clone())),
    }
}
