//! File-based store: one pretty-printed JSON document per session.
//!
//! Storage location: `~/.deskpilot/sessions/<hex(id)>.json` unless configured.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash mid-write never leaves a truncated session behind.

use async_trait::async_trait;
use deskpilot_core::error::SessionError;
use deskpilot_core::session::SessionStore;
use deskpilot_core::state::ConversationState;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session ids come from callers. Hex-encoding the id bytes keeps the
    /// name inside the directory and gives every distinct id its own file.
    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(session_id)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, session_id: &str) -> Result<Option<ConversationState>, SessionError> {
        let path = self.path_for(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::Storage(format!("{}: {e}", path.display()))),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            warn!(session_id, error = %e, "Corrupt session file");
            SessionError::Corrupt {
                session_id: session_id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to create session directory: {e}")))?;

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| SessionError::Storage(format!("Failed to serialize session: {e}")))?;

        let path = self.path_for(session_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to write session: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::Storage(format!("Failed to replace session file: {e}")))?;

        debug!(session_id, path = %path.display(), "Session saved");
        Ok(())
    }

    async fn count(&self) -> Result<usize, SessionError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SessionError::Storage(e.to_string())),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?
        {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
