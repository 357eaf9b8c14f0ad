//! Error types for the deskpilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Only two kinds ever reach a caller: configuration problems (missing
//! credentials or settings, surfaced with a remediation hint) and internal
//! failures. Everything else is recovered inside the dispatch loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all deskpilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Action errors ---
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        hint: Option<String>,
    },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The two error kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing credentials or setup; not retried, fix the environment.
    #[serde(rename = "configuration_error")]
    Configuration,
    /// Anything else.
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::Internal => "internal_error",
        }
    }
}

impl Error {
    /// Shorthand for a configuration error carrying a remediation hint.
    pub fn config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Classify this error for the caller-facing envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Configuration,
            Self::Provider(e) if e.is_configuration() => ErrorKind::Configuration,
            _ => ErrorKind::Internal,
        }
    }

    /// A suggested fix, present for configuration errors.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Config { hint, .. } => hint.clone(),
            Self::Provider(ProviderError::NotConfigured(_)) => Some(
                "Set DESKPILOT_API_KEY (or GROQ_API_KEY) or add api_key to ~/.deskpilot/config.toml"
                    .into(),
            ),
            Self::Provider(ProviderError::AuthenticationFailed(_)) => Some(
                "Check that the configured language-model API key is valid".into(),
            ),
            _ => None,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether this failure is a setup problem rather than a transient one.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::AuthenticationFailed(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    NotFound(String),

    #[error("Action {action_name} failed: {reason}")]
    ExecutionFailed { action_name: String, reason: String },

    #[error("Action {action_name} timed out after {timeout_secs}s")]
    Timeout { action_name: String, timeout_secs: u64 },

    #[error("Invalid action arguments: {0}")]
    InvalidArguments(String),

    /// The backend answered with `success: false` (or an unexpected shape).
    #[error("{0}")]
    Backend(String),

    #[error("Action not permitted for this handler: {0}")]
    NotPermitted(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt session record {session_id}: {reason}")]
    Corrupt { session_id: String, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.remediation().is_none());
    }

    #[test]
    fn missing_credentials_are_configuration_errors() {
        let err = Error::Provider(ProviderError::NotConfigured("no api key".into()));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.remediation().unwrap().contains("DESKPILOT_API_KEY"));
    }

    #[test]
    fn config_error_carries_hint() {
        let err = Error::config("API_URL is not set", "export API_URL=https://backend.example");
        assert_eq!(err.kind().as_str(), "configuration_error");
        assert_eq!(
            err.remediation().as_deref(),
            Some("export API_URL=https://backend.example")
        );
    }

    #[test]
    fn action_error_displays_correctly() {
        let err = Error::Action(ActionError::Timeout {
            action_name: "shopify_get_order_details".into(),
            timeout_secs: 30,
        });
        assert!(err.to_string().contains("shopify_get_order_details"));
        assert!(err.to_string().contains("30s"));
    }
}
