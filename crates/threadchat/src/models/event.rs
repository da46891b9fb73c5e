use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Discriminator of a raw agent event. Kinds this crate does not know are kept verbatim so
/// they can be counted and reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RawEventKind {
    TextDelta,
    ReasoningDelta,
    ToolStart,
    ToolArgsDelta,
    ToolEnd,
    TurnEnd,
    Unsupported(String),
}

impl RawEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            RawEventKind::TextDelta => "text-delta",
            RawEventKind::ReasoningDelta => "reasoning-delta",
            RawEventKind::ToolStart => "tool-start",
            RawEventKind::ToolArgsDelta => "tool-delta-args",
            RawEventKind::ToolEnd => "tool-end",
            RawEventKind::TurnEnd => "turn-end",
            RawEventKind::Unsupported(kind) => kind,
        }
    }
}

impl From<&str> for RawEventKind {
    fn from(kind: &str) -> Self {
        match kind {
            "text-delta" => RawEventKind::TextDelta,
            "reasoning-delta" => RawEventKind::ReasoningDelta,
            "tool-start" => RawEventKind::ToolStart,
            "tool-delta-args" => RawEventKind::ToolArgsDelta,
            "tool-end" => RawEventKind::ToolEnd,
            "turn-end" => RawEventKind::TurnEnd,
            other => RawEventKind::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for RawEventKind {
    fn from(kind: String) -> Self {
        RawEventKind::from(kind.as_str())
    }
}

impl From<RawEventKind> for String {
    fn from(kind: RawEventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event exactly as a streaming agent produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub kind: RawEventKind,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(kind: RawEventKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        let text: String = text.into();
        Self::new(RawEventKind::TextDelta, json!({ "text": text }))
    }

    pub fn reasoning<S: Into<String>>(text: S) -> Self {
        let text: String = text.into();
        Self::new(RawEventKind::ReasoningDelta, json!({ "text": text }))
    }

    /// Start a tool call without a provider id. `args` is either a JSON fragment string
    /// or an already structured value.
    pub fn tool_start<N: Into<String>, A: Into<Value>>(name: N, args: A) -> Self {
        let (name, args): (String, Value) = (name.into(), args.into());
        Self::new(RawEventKind::ToolStart, json!({ "name": name, "args": args }))
    }

    pub fn tool_start_with_id<I: Into<String>, N: Into<String>, A: Into<Value>>(
        id: I,
        name: N,
        args: A,
    ) -> Self {
        let (id, name, args): (String, String, Value) = (id.into(), name.into(), args.into());
        Self::new(
            RawEventKind::ToolStart,
            json!({ "id": id, "name": name, "args": args }),
        )
    }

    /// Continue the arguments of the most recently started call
    pub fn tool_args<S: Into<String>>(fragment: S) -> Self {
        let fragment: String = fragment.into();
        Self::new(RawEventKind::ToolArgsDelta, json!({ "args": fragment }))
    }

    pub fn tool_args_for<I: Into<String>, S: Into<String>>(id: I, fragment: S) -> Self {
        let (id, fragment): (String, String) = (id.into(), fragment.into());
        Self::new(RawEventKind::ToolArgsDelta, json!({ "id": id, "args": fragment }))
    }

    /// Finish the oldest call still waiting for its result
    pub fn tool_end(result: Value) -> Self {
        Self::new(RawEventKind::ToolEnd, json!({ "result": result }))
    }

    pub fn tool_end_for<I: Into<String>>(id: I, result: Value) -> Self {
        let id: String = id.into();
        Self::new(RawEventKind::ToolEnd, json!({ "id": id, "result": result }))
    }

    pub fn turn_end() -> Self {
        Self::new(RawEventKind::TurnEnd, Value::Null)
    }
}

/// A normalized, incremental update for a render sink. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayEvent {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ToolCallStart {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolCallResult {
        call_id: String,
        result: Value,
    },
    TurnComplete,
}

impl DisplayEvent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        DisplayEvent::TextDelta { text: text.into() }
    }

    pub fn thinking<S: Into<String>>(text: S) -> Self {
        DisplayEvent::ThinkingDelta { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DisplayEvent::TurnComplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_wire_name() {
        assert_eq!(RawEventKind::from("tool-delta-args"), RawEventKind::ToolArgsDelta);
        assert_eq!(
            RawEventKind::from("citation-delta"),
            RawEventKind::Unsupported("citation-delta".to_string())
        );
        assert_eq!(RawEventKind::Unsupported("x".into()).to_string(), "x");
    }

    #[test]
    fn test_raw_event_deserializes_unknown_kind() -> anyhow::Result<()> {
        let event: RawEvent = serde_json::from_value(json!({"kind": "server-ping"}))?;
        assert_eq!(event.kind, RawEventKind::Unsupported("server-ping".into()));
        assert_eq!(event.payload, Value::Null);

        let event: RawEvent =
            serde_json::from_value(json!({"kind": "text-delta", "payload": {"text": "hi"}}))?;
        assert_eq!(event, RawEvent::text("hi"));
        Ok(())
    }

    #[test]
    fn test_display_event_serialization() -> anyhow::Result<()> {
        let value = serde_json::to_value(DisplayEvent::ToolCallResult {
            call_id: "call_0".into(),
            result: json!({"r": "ok"}),
        })?;
        assert_eq!(
            value,
            json!({"type": "tool_call_result", "call_id": "call_0", "result": {"r": "ok"}})
        );
        assert!(DisplayEvent::TurnComplete.is_terminal());
        Ok(())
    }
}
