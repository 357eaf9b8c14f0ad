//! OpenAI-compatible provider implementation.
//!
//! Works with: Groq, OpenAI, OpenRouter, Ollama, vLLM, Together AI and any
//! endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Function calling, mapped onto action requests
//! - Health checks

use async_trait::async_trait;
use futures::StreamExt;
use deskpilot_core::action::ActionRequest;
use deskpilot_core::error::ProviderError;
use deskpilot_core::message::{Message, Role};
use deskpilot_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible language-model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create a Groq provider (convenience constructor).
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Transcript messages in chat-completions form. Action outcomes become
    /// `tool` messages tied back to their request id.
    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Action => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.action_requests.is_empty() {
                    None
                } else {
                    Some(
                        m.action_requests
                            .iter()
                            .map(|req| WireCall {
                                id: req.id.clone(),
                                r#type: "function".into(),
                                function: WireFunction {
                                    name: req.name.clone(),
                                    arguments: serde_json::Value::Object(req.arguments.clone())
                                        .to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.action_result.as_ref().map(|r| r.request_id.clone()),
            })
            .collect()
    }

    /// Action definitions as function tools.
    fn wire_tools(actions: &[ActionDefinition]) -> Vec<WireTool> {
        actions
            .iter()
            .map(|a| WireTool {
                r#type: "function".into(),
                function: WireToolSpec {
                    name: a.name.clone(),
                    description: a.description.clone(),
                    parameters: a.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::wire_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.actions.is_empty() {
            body["tools"] = serde_json::json!(Self::wire_tools(&request.actions));
        }

        body
    }

    /// POST to `/chat/completions` and map HTTP failures onto ProviderError.
    async fn post_completion(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key configured for provider '{}'",
                self.name
            )));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

/// Build an action request from a function call. Arguments that are not a
/// JSON object are logged and dropped; the action's own validation then
/// reports what is missing.
fn call_to_request(id: &str, name: &str, raw_arguments: &str) -> ActionRequest {
    let arguments = match serde_json::from_str::<serde_json::Value>(raw_arguments) {
        Ok(serde_json::Value::Object(map)) => map,
        _ if raw_arguments.trim().is_empty() => serde_json::Map::new(),
        _ => {
            warn!(action = %name, arguments = %raw_arguments, "Model sent non-object action arguments");
            serde_json::Map::new()
        }
    };
    let mut request = ActionRequest::new(name, arguments);
    if !id.is_empty() {
        request.id = id.to_string();
    }
    request
}

#[async_trait]
impl deskpilot_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post_completion(&body, false).await?;
        let completion: WireCompletion = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            });
        };

        let requests = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .iter()
            .map(|call| call_to_request(&call.id, &call.function.name, &call.function.arguments))
            .collect();

        Ok(ProviderResponse {
            message: Message::assistant_with_actions(choice.message.content.unwrap_or_default(), requests),
            usage: completion.usage.map(Usage::from),
            model: completion.model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post_completion(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new(provider_name);

            while let Some(next) = bytes.next().await {
                let data = match next {
                    Ok(data) => data,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };
                for chunk in decoder.feed(&data) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        return;
                    }
                }
            }

            // The body ended without a [DONE] marker.
            let _ = tx.send(Ok(decoder.finish(None))).await;
        });

        Ok(rx)
    }
}

/// Incremental decoder for a `text/event-stream` completion body.
///
/// Text deltas come out as they arrive. Function-call fragments are held
/// until the stream ends and then emitted, in model order, on the single
/// `done` chunk.
struct SseDecoder {
    provider: String,
    /// Bytes after the last newline; may end inside a UTF-8 sequence.
    pending: Vec<u8>,
    calls: BTreeMap<u32, PartialCall>,
    finished: bool,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl SseDecoder {
    fn new(provider: String) -> Self {
        Self {
            provider,
            pending: Vec::new(),
            calls: BTreeMap::new(),
            finished: false,
        }
    }

    /// Consume raw bytes; returns every chunk completed by them.
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();

        while !self.finished {
            let Some(end) = self.pending.iter().position(|&b| b == b'\n') else { break };
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let Some(payload) = line.trim_end().strip_prefix("data:") else {
                // Blank separators, comments and other SSE fields
                continue;
            };
            out.extend(self.payload(payload.trim()));
        }
        out
    }

    fn payload(&mut self, payload: &str) -> Option<StreamChunk> {
        if payload == "[DONE]" {
            return Some(self.finish(None));
        }

        let event = match serde_json::from_str::<WireStreamEvent>(payload) {
            Ok(event) => event,
            Err(e) => {
                trace!(provider = %self.provider, data = %payload, error = %e, "Ignoring unparseable SSE chunk");
                return None;
            }
        };

        if let Some(usage) = event.usage {
            return Some(self.finish(Some(usage.into())));
        }

        let delta = event.choices.into_iter().next()?.delta;
        for fragment in delta.tool_calls.unwrap_or_default() {
            let call = self.calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id {
                call.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    call.name = name;
                }
                call.arguments.push_str(function.arguments.as_deref().unwrap_or_default());
            }
        }

        delta.content.filter(|text| !text.is_empty()).map(|text| StreamChunk {
            content: Some(text),
            ..StreamChunk::default()
        })
    }

    /// The terminal chunk carrying the assembled action requests.
    fn finish(&mut self, usage: Option<Usage>) -> StreamChunk {
        self.finished = true;
        StreamChunk {
            content: None,
            action_requests: std::mem::take(&mut self.calls)
                .values()
                .map(|call| call_to_request(&call.id, &call.name, &call.arguments))
                .collect(),
            done: true,
            usage,
        }
    }
}

// --- chat-completions wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCall {
    id: String,
    r#type: String,
    function: WireFunction,
}

/// `arguments` is a JSON document encoded as a string.
#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireToolSpec,
}

#[derive(Debug, Serialize)]
struct WireToolSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// One `data: {...}` event of a streaming response.
#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct WireCallFragment {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
