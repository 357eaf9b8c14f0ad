//! The dispatch loop for deskpilot.
//!
//! Each caller utterance is one **turn**:
//!
//! 1. **Load** the session (short-circuit if a human already owns it)
//! 2. **Classify** the utterance into an intent category
//! 3. **Route** to the capability handler for that category
//! 4. **If action requests**: execute them, append results, back to the handler
//! 5. **If reply text**: persist the state and answer the caller
//!
//! The loop ends on a reply, on escalation, or at the iteration cap.

pub mod classifier;
pub mod dispatcher;
pub mod handler;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use classifier::{ClassifierContext, IntentClassifier, KeywordClassifier, LlmClassifier};
pub use dispatcher::{
    ActionLogEntry, CONNECTING_REPLY, Dispatcher, ESCALATED_SESSION_REPLY, TurnOutcome, TurnRequest,
};
pub use handler::{CapabilityHandler, HandlerSet, LlmHandler, standard_capabilities};
pub use stream_event::{DispatchEvent, EventSink, LineAssembler};
