use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider registered twice: {0}")]
    DuplicateProvider(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Malformed arguments for tool call {call_id} ({name}): {fragment:?}")]
    MalformedToolArguments {
        call_id: String,
        name: String,
        fragment: String,
    },

    #[error("Tool result without a matching start: {0}")]
    UnmatchedToolResult(String),

    #[error("Tool call {0} never received a result")]
    IncompleteToolCall(String),

    #[error("Tool call id reused within one turn: {0}")]
    DuplicateToolCall(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Render sink rejected event: {0}")]
    SinkRejection(String),

    #[error("Thread store failure: {0}")]
    StoreFailure(String),

    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Turn cancelled")]
    Cancelled,
}

pub type ChatResult<T> = Result<T, ChatError>;

/// A failed turn, with enough context for the caller to decide what to do with any output
/// that was already displayed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Turn on thread {thread_id} failed after {events_forwarded} display events: {source}")]
pub struct TurnError {
    pub thread_id: String,
    pub events_forwarded: usize,
    /// Index of the last display event the sink accepted, if any.
    pub last_event_index: Option<usize>,
    #[source]
    pub source: ChatError,
}

impl TurnError {
    pub fn new(thread_id: impl Into<String>, events_forwarded: usize, source: ChatError) -> Self {
        Self {
            thread_id: thread_id.into(),
            events_forwarded,
            last_event_index: events_forwarded.checked_sub(1),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.source == ChatError::Cancelled
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::StoreFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::StoreFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_error_context() {
        let err = TurnError::new("t1", 3, ChatError::SinkRejection("closed".into()));
        assert_eq!(err.last_event_index, Some(2));
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("t1"));

        let err = TurnError::new("t1", 0, ChatError::Cancelled);
        assert_eq!(err.last_event_index, None);
        assert!(err.is_cancelled());
    }
}
