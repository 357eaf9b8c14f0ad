//! Dispatch-level streaming events.
//!
//! `DispatchEvent`s are what the streaming endpoint writes, one JSON object
//! per line (NDJSON), in the order the turn produced them:
//! - `classification`: the routing decision
//! - `action_start` / `action_end`: one pair per executed action
//! - `token`: reply text as it is generated
//! - `done`: terminal, carries the full turn result
//! - `error`: terminal, the turn failed

use deskpilot_core::intent::{DecisionSource, IntentCategory};
use deskpilot_core::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::dispatcher::TurnOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DispatchEvent {
    Classification {
        category: IntentCategory,
        confidence: f32,
        rationale: String,
        source: DecisionSource,
    },

    ActionStart {
        request_id: String,
        name: String,
        arguments: Map<String, Value>,
    },

    ActionEnd {
        request_id: String,
        name: String,
        success: bool,
        /// The `{success, data | error}` envelope
        payload: Value,
        duration_ms: u64,
    },

    Token { content: String },

    Done(TurnOutcome),

    Error {
        kind: ErrorKind,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
}

impl DispatchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Classification { .. } => "classification",
            Self::ActionStart { .. } => "action_start",
            Self::ActionEnd { .. } => "action_end",
            Self::Token { .. } => "token",
            Self::Done(_) => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error { .. })
    }

    pub fn from_error(e: &deskpilot_core::Error) -> Self {
        Self::Error {
            kind: e.kind(),
            error: e.to_string(),
            suggestion: e.remediation(),
        }
    }

    /// One NDJSON line, newline included.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"internal_error","error":"unencodable event: {e}"}}"#)
        });
        line.push('\n');
        line
    }
}

/// Where the dispatch loop and handlers send events.
///
/// A blocking turn uses [`EventSink::none`]; every emit is then a no-op.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<DispatchEvent>>,
}

impl EventSink {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel(tx: mpsc::Sender<DispatchEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Whether anyone is consuming events incrementally.
    pub fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    /// The consumer went away.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    pub async fn emit(&self, event: DispatchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Reassembles NDJSON events from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<DispatchEvent, serde_json::Error>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = line.trim_ascii();
            if !line.is_empty() {
                events.push(serde_json::from_slice(line));
            }
        }
        events
    }

    /// Parse whatever is left once the stream has ended.
    pub fn finish(self) -> Option<Result<DispatchEvent, serde_json::Error>> {
        let rest = self.buf.trim_ascii();
        (!rest.is_empty()).then(|| serde_json::from_slice(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_token() {
        let event = DispatchEvent::Token { content: "Hello".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"token""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_fields_are_camel_case() {
        let event = DispatchEvent::ActionEnd {
            request_id: "act_1".into(),
            name: "shopify_get_order_details".into(),
            success: true,
            payload: serde_json::json!({ "success": true, "data": {} }),
            duration_ms: 12,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"action_end""#));
        assert!(json.contains(r#""requestId":"act_1""#));
        assert!(json.contains(r#""durationMs":12"#));
    }

    #[test]
    fn error_event_carries_suggestion() {
        let err = deskpilot_core::Error::config("missing key", "set DESKPILOT_API_KEY");
        let json = DispatchEvent::from_error(&err).to_ndjson();
        assert!(json.ends_with('\n'));
        assert!(json.contains(r#""kind":"configuration_error""#));
        assert!(json.contains("DESKPILOT_API_KEY"));
    }

    #[test]
    fn assembler_handles_split_lines() {
        let a = DispatchEvent::Token { content: "Hel".into() }.to_ndjson();
        let b = DispatchEvent::Token { content: "lo ✓".into() }.to_ndjson();
        let wire = format!("{a}{b}");
        let bytes = wire.as_bytes();

        let mut asm = LineAssembler::new();
        let mut out = Vec::new();
        // Split inside the multibyte check mark too.
        for chunk in bytes.chunks(5) {
            out.extend(asm.push(chunk));
        }
        assert!(asm.finish().is_none());

        let tokens: Vec<String> = out
            .into_iter()
            .map(|r| match r.unwrap() {
                DispatchEvent::Token { content } => content,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(tokens, vec!["Hel", "lo ✓"]);
    }

    #[test]
    fn assembler_parses_unterminated_tail() {
        let mut asm = LineAssembler::new();
        assert!(asm.push(br#"{"type":"token","content":"x"}"#).is_empty());
        assert!(matches!(asm.finish(), Some(Ok(DispatchEvent::Token { .. }))));
    }

    #[tokio::test]
    async fn closed_sink_is_detected() {
        let (tx, rx) = mpsc::channel(4);
        let sink = EventSink::channel(tx);
        assert!(sink.is_streaming() && !sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        sink.emit(DispatchEvent::Token { content: "ignored".into() }).await;

        assert!(!EventSink::none().is_closed());
    }
}
