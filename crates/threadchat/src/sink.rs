use thiserror::Error;

use crate::models::event::DisplayEvent;
use crate::models::message::Message;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(reason: impl Into<String>) -> Self {
        SinkError(reason.into())
    }
}

/// Consumer of display events, typically a UI. Events arrive one at a time, in order, as soon
/// as they are produced. Returning an error aborts the running turn.
pub trait RenderSink: Send {
    fn accept(&mut self, event: &DisplayEvent) -> Result<(), SinkError>;

    /// A stored user message, met while replaying a thread's history.
    fn user_message(&mut self, _message: &Message) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn accept(&mut self, event: &DisplayEvent) -> Result<(), SinkError> {
        (**self).accept(event)
    }

    fn user_message(&mut self, message: &Message) -> Result<(), SinkError> {
        (**self).user_message(message)
    }
}

/// Collects every event it sees.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    pub events: Vec<DisplayEvent>,
    pub user_messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderSink for Transcript {
    fn accept(&mut self, event: &DisplayEvent) -> Result<(), SinkError> {
        self.events.push(event.clone());
        Ok(())
    }

    fn user_message(&mut self, message: &Message) -> Result<(), SinkError> {
        self.user_messages.push(message.clone());
        Ok(())
    }
}
