//! # deskpilot Actions
//!
//! The side-effecting half of the dispatcher: a client for the commerce and
//! subscription backend, the catalog of named actions built on it, the
//! reserved escalation action, and the executor that runs requests and
//! detects escalation.
//!
//! ```text
//! handler ──ActionRequest──▶ ActionExecutor ──▶ ActionRegistry ──▶ BackendAction ──▶ Backend
//!                               │                                                 (http | mock)
//!                               └── escalate_to_human ⇒ isEscalated + EscalationDetail
//! ```

pub mod backend;
pub mod catalog;
pub mod escalation;
pub mod executor;
pub mod mock;

pub use backend::{API_URL_NOT_SET, Backend, HttpBackend, normalize_envelope};
pub use catalog::{
    ActionSpec, BackendAction, CATALOG, ORDER_MANAGEMENT_ACTIONS, RESOLUTION_ACTIONS, SALES_ACTIONS,
    SUBSCRIPTION_ACTIONS,
};
pub use escalation::{ESCALATION_REASONS, EscalateToHuman};
pub use executor::{ActionExecutor, Execution};
pub use mock::MockBackend;

use deskpilot_core::action::ActionRegistry;
use std::sync::Arc;

/// The global registry: every catalog action bound to `backend`, plus
/// `escalate_to_human`.
pub fn default_registry(backend: Arc<dyn Backend>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for spec in CATALOG {
        registry.register(Arc::new(BackendAction::new(spec, backend.clone())));
    }
    registry.register(Arc::new(EscalateToHuman));
    registry
}
