//! Folds the raw event stream of a streaming agent into display events and the assistant
//! message they describe.
//!
//! The normalizer is a pure state machine. It never touches storage or a render sink; the
//! controller feeds it one raw event at a time and forwards whatever it returns.
//!
//! Rules:
//! - consecutive deltas of one kind grow a single text or thinking part, while every
//!   non-empty delta is still surfaced as its own display event
//! - a different kind, or a tool call entering the message, closes the open block
//! - a tool call is announced once its streamed arguments parse as JSON, and is placed in the
//!   message at that point
//! - `TurnComplete` is emitted once, last, and only when every tool call has its result
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{ChatError, ChatResult};
use crate::models::event::{DisplayEvent, RawEvent, RawEventKind};
use crate::models::message::{Message, MessagePart};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
}

#[derive(Debug)]
struct ToolCallState {
    id: String,
    name: String,
    buffer: String,
    arguments: Option<Value>,
    /// Position of the `ToolCall` part once it has been announced.
    part: Option<usize>,
    finished: bool,
}

impl ToolCallState {
    fn try_complete(&mut self) -> bool {
        if self.arguments.is_none() && !self.buffer.trim().is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(&self.buffer) {
                self.arguments = Some(value);
            }
        }
        self.arguments.is_some()
    }

    fn malformed(&self) -> ChatError {
        ChatError::MalformedToolArguments {
            call_id: self.id.clone(),
            name: self.name.clone(),
            fragment: self.buffer.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Normalizer {
    message: Message,
    open_block: Option<(BlockKind, usize)>,
    calls: Vec<ToolCallState>,
    unsupported: usize,
    complete: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            message: Message::assistant(),
            open_block: None,
            calls: Vec::new(),
            unsupported: 0,
            complete: false,
        }
    }

    /// Number of raw events skipped because their kind is not supported.
    pub fn unsupported_events(&self) -> usize {
        self.unsupported
    }

    /// Whether `TurnComplete` has been emitted.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fold one raw event, returning the display events it produces (possibly none).
    pub fn push(&mut self, event: RawEvent) -> ChatResult<Vec<DisplayEvent>> {
        if self.complete {
            return Err(ChatError::MalformedEvent(format!(
                "{} received after the turn ended",
                event.kind
            )));
        }

        match event.kind {
            RawEventKind::TextDelta => {
                let text = delta_text(&event.payload, "text-delta")?;
                Ok(self.append_block(BlockKind::Text, text))
            }
            RawEventKind::ReasoningDelta => {
                let text = delta_text(&event.payload, "reasoning-delta")?;
                Ok(self.append_block(BlockKind::Thinking, text))
            }
            RawEventKind::ToolStart => self.start_tool(&event.payload),
            RawEventKind::ToolArgsDelta => self.extend_tool_args(&event.payload),
            RawEventKind::ToolEnd => self.end_tool(event.payload),
            RawEventKind::TurnEnd => self.end_turn(),
            RawEventKind::Unsupported(kind) => {
                self.unsupported += 1;
                warn!("Ignoring unsupported agent event kind {:?}", kind);
                Ok(Vec::new())
            }
        }
    }

    /// The accumulated assistant message. Only available once the turn has completed.
    pub fn finish(self) -> ChatResult<Message> {
        if !self.complete {
            return Err(ChatError::MalformedEvent(
                "turn has not completed".to_string(),
            ));
        }
        Ok(self.message)
    }

    fn append_block(&mut self, kind: BlockKind, text: &str) -> Vec<DisplayEvent> {
        if text.is_empty() {
            return Vec::new();
        }

        match self.open_block {
            Some((open, index)) if open == kind => {
                if let Some(MessagePart::Text { content } | MessagePart::Thinking { content }) =
                    self.message.parts.get_mut(index)
                {
                    content.push_str(text);
                }
            }
            _ => {
                let part = match kind {
                    BlockKind::Text => MessagePart::text(text),
                    BlockKind::Thinking => MessagePart::thinking(text),
                };
                self.message.parts.push(part);
                self.open_block = Some((kind, self.message.parts.len() - 1));
            }
        }

        vec![match kind {
            BlockKind::Text => DisplayEvent::text(text),
            BlockKind::Thinking => DisplayEvent::thinking(text),
        }]
    }

    /// `call_<n>` for the first `n` from the number of calls so far that no call uses yet.
    fn next_call_id(&self) -> String {
        (self.calls.len()..)
            .map(|n| format!("call_{}", n))
            .find(|id| self.calls.iter().all(|call| &call.id != id))
            .unwrap_or_default()
    }

    fn start_tool(&mut self, payload: &Value) -> ChatResult<Vec<DisplayEvent>> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::MalformedEvent("tool-start without a name".to_string()))?;

        let id = match payload.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.next_call_id(),
        };
        if self.calls.iter().any(|call| call.id == id) {
            return Err(ChatError::DuplicateToolCall(id));
        }

        let mut call = ToolCallState {
            id,
            name: name.to_string(),
            buffer: String::new(),
            arguments: None,
            part: None,
            finished: false,
        };
        match payload.get("args") {
            None | Some(Value::Null) => {}
            Some(Value::String(fragment)) => call.buffer.push_str(fragment),
            Some(structured) => call.arguments = Some(structured.clone()),
        }

        debug!("Tool call {} ({}) started", call.id, call.name);
        self.calls.push(call);
        let index = self.calls.len() - 1;
        Ok(self.announce_if_complete(index))
    }

    fn extend_tool_args(&mut self, payload: &Value) -> ChatResult<Vec<DisplayEvent>> {
        let fragment = payload
            .get("args")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ChatError::MalformedEvent("tool-delta-args without an args fragment".to_string())
            })?;

        let index = match payload.get("id").and_then(Value::as_str) {
            Some(id) => self
                .calls
                .iter()
                .position(|call| call.id == id)
                .ok_or_else(|| {
                    ChatError::MalformedEvent(format!("arguments for unknown tool call {}", id))
                })?,
            None => self
                .calls
                .iter()
                .rposition(|call| call.arguments.is_none())
                .ok_or_else(|| {
                    ChatError::MalformedEvent(
                        "arguments delta without an open tool call".to_string(),
                    )
                })?,
        };

        let call = &mut self.calls[index];
        if call.arguments.is_some() {
            // The arguments already formed a complete value; anything more cannot parse.
            call.buffer.push_str(fragment);
            return Err(call.malformed());
        }
        call.buffer.push_str(fragment);
        Ok(self.announce_if_complete(index))
    }

    fn end_tool(&mut self, payload: Value) -> ChatResult<Vec<DisplayEvent>> {
        let index = match payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                let index = self
                    .calls
                    .iter()
                    .position(|call| call.id == id)
                    .ok_or_else(|| ChatError::UnmatchedToolResult(id.to_string()))?;
                if self.calls[index].finished {
                    return Err(ChatError::UnmatchedToolResult(id.to_string()));
                }
                index
            }
            None => self
                .calls
                .iter()
                .position(|call| !call.finished)
                .ok_or_else(|| ChatError::UnmatchedToolResult("<no id>".to_string()))?,
        };

        let mut events = Vec::new();
        {
            let call = &mut self.calls[index];
            if !call.try_complete() {
                if !call.buffer.trim().is_empty() {
                    return Err(call.malformed());
                }
                call.arguments = Some(Value::Object(Default::default()));
            }
        }
        events.extend(self.announce_if_complete(index));

        let result = match payload {
            Value::Object(mut map) => map.remove("result").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        let call = &mut self.calls[index];
        call.finished = true;
        if let Some(MessagePart::ToolCall { result: slot, .. }) =
            call.part.and_then(|part| self.message.parts.get_mut(part))
        {
            *slot = Some(result.clone());
        }

        debug!("Tool call {} finished", call.id);
        events.push(DisplayEvent::ToolCallResult {
            call_id: call.id.clone(),
            result,
        });
        Ok(events)
    }

    fn end_turn(&mut self) -> ChatResult<Vec<DisplayEvent>> {
        for call in &mut self.calls {
            if !call.try_complete() {
                return Err(call.malformed());
            }
        }
        if let Some(call) = self.calls.iter().find(|call| !call.finished) {
            return Err(ChatError::IncompleteToolCall(call.id.clone()));
        }

        self.open_block = None;
        self.complete = true;
        Ok(vec![DisplayEvent::TurnComplete])
    }

    /// Emit `ToolCallStart` and place the part once the call's arguments are complete.
    fn announce_if_complete(&mut self, index: usize) -> Vec<DisplayEvent> {
        let call = &mut self.calls[index];
        if call.part.is_some() || !call.try_complete() {
            return Vec::new();
        }

        let arguments = call.arguments.clone().unwrap_or(Value::Null);
        self.message.parts.push(MessagePart::tool_call(
            call.id.clone(),
            call.name.clone(),
            arguments.clone(),
            None,
        ));
        call.part = Some(self.message.parts.len() - 1);
        self.open_block = None;

        vec![DisplayEvent::ToolCallStart {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }]
    }
}

fn delta_text<'a>(payload: &'a Value, kind: &str) -> ChatResult<&'a str> {
    payload
        .as_str()
        .or_else(|| payload.get("text").and_then(Value::as_str))
        .ok_or_else(|| ChatError::MalformedEvent(format!("{} without text", kind)))
}

/// Display events describing an already committed message, for redisplaying history through
/// the same rendering path as a live turn. Ends with `TurnComplete`.
pub fn replay_message(message: &Message) -> Vec<DisplayEvent> {
    let mut events = Vec::new();
    for part in &message.parts {
        match part {
            MessagePart::Text { content } => events.push(DisplayEvent::text(content.as_str())),
            MessagePart::Thinking { content } => {
                events.push(DisplayEvent::thinking(content.as_str()))
            }
            MessagePart::ToolCall {
                id,
                name,
                arguments,
                result,
            } => {
                events.push(DisplayEvent::ToolCallStart {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
                if let Some(result) = result {
                    events.push(DisplayEvent::ToolCallResult {
                        call_id: id.clone(),
                        result: result.clone(),
                    });
                }
            }
            // Attachments only come from users and have no display event.
            MessagePart::Image { .. } => {}
        }
    }
    events.push(DisplayEvent::TurnComplete);
    events
}

/// Run a complete, finite event sequence through a fresh normalizer. A sequence that ends
/// without `turn-end` is completed implicitly.
pub fn normalize<I>(events: I) -> ChatResult<(Vec<DisplayEvent>, Message)>
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut normalizer = Normalizer::new();
    let mut display = Vec::new();
    for event in events {
        display.extend(normalizer.push(event)?);
        if normalizer.is_complete() {
            break;
        }
    }
    if !normalizer.is_complete() {
        display.extend(normalizer.push(RawEvent::turn_end())?);
    }
    Ok((display, normalizer.finish()?))
}
