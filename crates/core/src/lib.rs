//! # deskpilot Core
//!
//! Domain types, traits, and error definitions for the deskpilot support
//! dispatcher. This crate has **zero framework dependencies**; it defines the
//! conversation model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the dispatch loop is a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping the session store or language model via configuration
//! - Easy testing with scripted stand-ins
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod action;
pub mod intent;
pub mod state;
pub mod session;
pub mod policy;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, Role};
pub use provider::{ActionDefinition, Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use action::{Action, ActionOutcome, ActionRegistry, ActionRequest, ActionResult, ESCALATION_ACTION};
pub use intent::{DecisionSource, IntentCategory, IntentDecision};
pub use state::{AuditEntry, AuditRecord, ConversationState, EscalationDetail, StateUpdate};
pub use session::SessionStore;
pub use policy::{format_policies, PolicyProvider, StaticPolicies};
pub use event::{DomainEvent, EventBus};
