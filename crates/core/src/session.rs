//! SessionStore trait: keyed persistence of conversation state.
//!
//! The dispatcher only ever talks to this trait, so the in-memory demo
//! store can be replaced by a durable one without touching the loop.
//! Implementations: in-memory, JSON files, SQLite.

use async_trait::async_trait;

use crate::error::SessionError;
use crate::state::ConversationState;

/// The core SessionStore trait.
///
/// A `save` followed by a `load` of the same id must observe the saved
/// value within one process. Serializing concurrent turns of one session is
/// the caller's job (see the per-session locks in `deskpilot-sessions`).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Fetch a stored state, `None` if the id was never saved.
    async fn get(&self, session_id: &str) -> std::result::Result<Option<ConversationState>, SessionError>;

    /// Store the state under the given id, replacing any previous value.
    async fn save(&self, session_id: &str, state: &ConversationState) -> std::result::Result<(), SessionError>;

    /// Load the state, or a fresh default one for an unknown id.
    async fn load(&self, session_id: &str) -> std::result::Result<ConversationState, SessionError> {
        Ok(self
            .get(session_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(session_id)))
    }

    /// Number of stored sessions.
    async fn count(&self) -> std::result::Result<usize, SessionError>;
}
