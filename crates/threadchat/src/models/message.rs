use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// One displayable block of a message
pub enum MessagePart {
    Text {
        content: String,
    },
    /// Model-internal reasoning, rendered apart from the answer text
    Thinking {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// An attached picture, base64 encoded
    Image {
        media_type: String,
        data: String,
    },
}

impl MessagePart {
    pub fn text<S: Into<String>>(content: S) -> Self {
        MessagePart::Text {
            content: content.into(),
        }
    }

    pub fn thinking<S: Into<String>>(content: S) -> Self {
        MessagePart::Thinking {
            content: content.into(),
        }
    }

    pub fn tool_call<S: Into<String>, N: Into<String>>(
        id: S,
        name: N,
        arguments: Value,
        result: Option<Value>,
    ) -> Self {
        MessagePart::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
            result,
        }
    }

    pub fn image<M: Into<String>, D: Into<String>>(media_type: M, data: D) -> Self {
        MessagePart::Image {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { content } => Some(content),
            _ => None,
        }
    }

    pub fn as_thinking(&self) -> Option<&str> {
        match self {
            MessagePart::Thinking { content } => Some(content),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, MessagePart::ToolCall { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One turn of conversation content
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub parts: Vec<MessagePart>,
}

impl Message {
    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message {
            role: Role::User,
            created: Utc::now().timestamp(),
            parts: Vec::new(),
        }
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            created: Utc::now().timestamp(),
            parts: Vec::new(),
        }
    }

    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_part(MessagePart::text(text))
    }

    pub fn with_thinking<S: Into<String>>(self, text: S) -> Self {
        self.with_part(MessagePart::thinking(text))
    }

    pub fn with_image<M: Into<String>, D: Into<String>>(self, media_type: M, data: D) -> Self {
        self.with_part(MessagePart::image(media_type, data))
    }

    pub fn with_tool_call<S: Into<String>, N: Into<String>>(
        self,
        id: S,
        name: N,
        arguments: Value,
        result: Value,
    ) -> Self {
        self.with_part(MessagePart::tool_call(id, name, arguments, Some(result)))
    }

    /// Concatenated answer text, ignoring thinking and tool parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `(media_type, data)` of every attached image
    pub fn images(&self) -> Vec<(&str, &str)> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Image { media_type, data } => {
                    Some((media_type.as_str(), data.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Tool calls still waiting for a result. A committed message never has any.
    pub fn pending_tool_calls(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::ToolCall {
                    id, result: None, ..
                } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}
