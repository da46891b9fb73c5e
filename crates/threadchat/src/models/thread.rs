use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use crate::store::CheckpointHandle;

pub const DEFAULT_TITLE: &str = "New thread";

/// List-view projection of a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// A conversation together with its committed history
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
    pub checkpoint: CheckpointHandle,
}

impl Thread {
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Title for a thread: the first non-empty line of its first user message.
pub fn derive_title(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .find(|message| message.role == Role::User)
        .and_then(|message| {
            message
                .parts
                .iter()
                .filter_map(|part| part.as_text())
                .flat_map(str::lines)
                .map(str::trim)
                .find(|line| !line.is_empty())
        })
        .map(String::from)
}
