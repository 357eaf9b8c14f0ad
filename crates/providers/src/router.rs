//! Provider router: resolves the language-model service named in config.

use std::collections::HashMap;
use std::sync::Arc;

use deskpilot_config::{AppConfig, ProviderConfig};
use deskpilot_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Providers by name, plus the one the dispatcher uses by default.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The provider named by `default_provider`.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.get(&self.default_provider)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Build every configured provider, and the default one even when it has
/// no `[providers.<name>]` table.
///
/// A provider without a key is still registered. It fails with
/// `ProviderError::NotConfigured` on first use, which the caller reports as
/// a configuration error with a remediation hint.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    let implicit = ProviderConfig::default();
    let mut entries: Vec<(&String, &ProviderConfig)> = config.providers.iter().collect();
    if !config.providers.contains_key(&config.default_provider) {
        entries.push((&config.default_provider, &implicit));
    }

    for (name, settings) in entries {
        let api_key = settings.api_key.as_deref().or(config.api_key.as_deref()).unwrap_or_default();
        let base_url = settings.api_url.clone().unwrap_or_else(|| well_known_url(name));
        router.register(name.clone(), Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)));
    }

    router
}

/// Chat-completions base URL for services known by name.
fn well_known_url(name: &str) -> String {
    match name {
        "groq" => "https://api.groq.com/openai/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        other => format!("https://{other}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_is_always_registered() {
        let router = build_from_config(&AppConfig::default());
        assert_eq!(router.default().unwrap().name(), "groq");
        assert_eq!(router.names(), ["groq"]);
    }

    #[test]
    fn well_known_names_resolve() {
        assert!(well_known_url("groq").contains("api.groq.com"));
        assert!(well_known_url("openai").contains("api.openai.com"));
        assert!(well_known_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn configured_tables_are_registered_alongside_the_default() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "local".into(),
            toml::from_str("api_url = \"http://127.0.0.1:9000/v1\"\napi_key = \"k\"").unwrap(),
        );
        let router = build_from_config(&config);
        assert_eq!(router.names(), ["groq", "local"]);
        assert_eq!(router.get("local").unwrap().name(), "local");
        assert!(router.get("openai").is_none());
    }
}
