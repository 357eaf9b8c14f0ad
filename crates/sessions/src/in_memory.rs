//! In-memory store: the default, and the one the tests use.

use async_trait::async_trait;
use deskpilot_core::error::SessionError;
use deskpilot_core::session::SessionStore;
use deskpilot_core::state::ConversationState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sessions held in a map for the lifetime of the process.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn count(&self) -> Result<usize, SessionError> {
        Ok(self.sessions.read().await.len())
    }
}
