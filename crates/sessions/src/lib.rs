//! Session store implementations for deskpilot.

pub mod in_memory;
pub mod file_backend;
pub mod locks;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemorySessionStore;
pub use file_backend::FileSessionStore;
pub use locks::SessionLocks;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;

use deskpilot_core::error::SessionError;
use deskpilot_core::session::SessionStore;
use std::sync::Arc;

/// Build the store named by `[sessions] backend`.
pub async fn store_from_config(
    config: &deskpilot_config::AppConfig,
) -> Result<Arc<dyn SessionStore>, SessionError> {
    match config.sessions.backend.as_str() {
        "memory" => Ok(Arc::new(InMemorySessionStore::new())),
        "file" => Ok(Arc::new(FileSessionStore::new(config.sessions_path()))),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let path = config.sessions_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SessionError::Storage(e.to_string()))?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteSessionStore::new(&url).await?))
        }
        other => Err(SessionError::Storage(format!(
            "Session backend '{other}' is not available in this build"
        ))),
    }
}
