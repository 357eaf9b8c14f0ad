//! Action trait: the abstraction over side-effecting backend operations.
//!
//! Actions are what let a handler act for the customer: look up an order,
//! issue a refund, pause a subscription, hand the conversation to a human.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ActionError;
use crate::provider::ActionDefinition;

/// The reserved action whose successful result escalates the session.
pub const ESCALATION_ACTION: &str = "escalate_to_human";

/// A request to execute an action, attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Generated request ID (matches the model's call id when it supplies one)
    pub id: String,

    /// Name of the action to execute
    pub name: String,

    /// Structured arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// Either the success payload or the error string of an executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success(Value),
    Error(String),
}

/// The result of an action execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// The request this result answers
    pub request_id: String,

    /// The action that was requested
    pub name: String,

    pub outcome: ActionOutcome,
}

impl ActionResult {
    pub fn success(request: &ActionRequest, data: Value) -> Self {
        Self {
            request_id: request.id.clone(),
            name: request.name.clone(),
            outcome: ActionOutcome::Success(data),
        }
    }

    pub fn error(request: &ActionRequest, error: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            name: request.name.clone(),
            outcome: ActionOutcome::Error(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Success(_))
    }

    /// The uniform `{success, data | error}` envelope.
    pub fn to_envelope(&self) -> Value {
        match &self.outcome {
            ActionOutcome::Success(data) => serde_json::json!({ "success": true, "data": data }),
            ActionOutcome::Error(error) => serde_json::json!({ "success": false, "error": error }),
        }
    }
}

/// The core Action trait.
///
/// Each backend operation (order lookup, refund, subscription pause, …)
/// implements this trait. Actions are registered in an [`ActionRegistry`];
/// each handler sees only the subset it is bound to.
#[async_trait]
pub trait Action: Send + Sync {
    /// The unique name of this action (e.g., "shopify_get_order_details").
    fn name(&self) -> &str;

    /// A description of what this action does (sent to the language model).
    fn description(&self) -> &str;

    /// JSON Schema describing this action's arguments.
    fn parameters_schema(&self) -> Value;

    /// Execute the action, returning the success payload.
    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ActionError>;

    /// Convert this action into an ActionDefinition for the language model.
    fn to_definition(&self) -> ActionDefinition {
        ActionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available actions.
///
/// The global registry holds every action the executor can run; handlers get
/// a narrowed copy via [`ActionRegistry::subset`].
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Replaces any existing action with the same name.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        let name = action.name().to_string();
        self.actions.insert(name, action);
    }

    /// Get an action by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// A registry holding only the named actions that exist here.
    pub fn subset(&self, names: &[&str]) -> Self {
        let actions = names
            .iter()
            .filter_map(|n| self.actions.get(*n).map(|a| (n.to_string(), a.clone())))
            .collect();
        Self { actions }
    }

    /// All action definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ActionDefinition> {
        let mut defs: Vec<_> = self.actions.values().map(|a| a.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a request against the registered action.
    pub async fn execute(&self, request: &ActionRequest) -> Result<Value, ActionError> {
        let action = self
            .actions
            .get(&request.name)
            .ok_or_else(|| ActionError::NotFound(request.name.clone()))?;
        action.execute(&request.arguments).await
    }

    /// All registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
