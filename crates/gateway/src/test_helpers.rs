//! Shared fixtures for gateway tests.

use std::sync::Arc;

use deskpilot_actions::{MockBackend, default_registry};
use deskpilot_core::StaticPolicies;
use deskpilot_core::error::ProviderError;
use deskpilot_core::message::Message;
use deskpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use deskpilot_dispatch::Dispatcher;
use deskpilot_sessions::InMemorySessionStore;

use crate::{GatewayState, SharedState};

/// Lightweight mock provider for gateway tests.
///
/// Answers every request with the same text, which the classifier cannot
/// parse, so routing goes through the keyword fallback.
pub struct MockProvider {
    response: Result<String, ProviderError>,
}

impl MockProvider {
    pub fn new(text: &str) -> Self {
        Self { response: Ok(text.to_string()) }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self { response: Err(error) }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "gateway_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let text = self.response.clone()?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }
}

pub fn test_state_with(provider: MockProvider) -> SharedState {
    let dispatcher = Dispatcher::from_config(
        &deskpilot_config::AppConfig::default(),
        Arc::new(provider),
        default_registry(Arc::new(MockBackend::new())),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(StaticPolicies::default()),
    );
    Arc::new(GatewayState::new(dispatcher))
}

pub fn test_state(reply: &str) -> SharedState {
    test_state_with(MockProvider::new(reply))
}
