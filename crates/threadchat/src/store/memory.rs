use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CheckpointHandle, CheckpointSource, ThreadStore};
use crate::errors::{ChatError, ChatResult};
use crate::models::message::Message;
use crate::models::thread::{derive_title, ThreadSummary, DEFAULT_TITLE};

struct MemoryEntry {
    title: Option<String>,
    explicit_title: bool,
    messages: Vec<Message>,
    updated_at: DateTime<Utc>,
    sequence: u64,
}

impl MemoryEntry {
    fn summary(&self, id: &str) -> ThreadSummary {
        ThreadSummary {
            id: id.to_string(),
            title: self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
struct Entries {
    threads: HashMap<String, MemoryEntry>,
    sequence: u64,
}

impl Entries {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

#[derive(Default)]
struct Shared {
    entries: RwLock<Entries>,
}

#[async_trait]
impl CheckpointSource for Shared {
    async fn history(&self, thread_id: &str) -> ChatResult<Vec<Message>> {
        let entries = self.entries.read().await;
        entries
            .threads
            .get(thread_id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))
    }
}

/// In-memory storage for testing and ephemeral sessions.
#[derive(Default, Clone)]
pub struct MemoryThreadStore {
    shared: Arc<Shared>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, thread_id: &str) -> CheckpointHandle {
        CheckpointHandle::new(thread_id, self.shared.clone())
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn create(&self) -> ChatResult<(ThreadSummary, CheckpointHandle)> {
        let mut entries = self.shared.entries.write().await;
        let id = Uuid::new_v4().to_string();
        let sequence = entries.next_sequence();
        let entry = MemoryEntry {
            title: None,
            explicit_title: false,
            messages: Vec::new(),
            updated_at: Utc::now(),
            sequence,
        };
        let summary = entry.summary(&id);
        entries.threads.insert(id.clone(), entry);
        Ok((summary, self.handle(&id)))
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> ChatResult<ThreadSummary> {
        let mut entries = self.shared.entries.write().await;
        let sequence = entries.next_sequence();
        let entry = entries
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;

        entry.messages.extend_from_slice(messages);
        if !entry.explicit_title {
            entry.title = derive_title(&entry.messages);
        }
        entry.updated_at = Utc::now();
        entry.sequence = sequence;
        Ok(entry.summary(thread_id))
    }

    async fn load(&self, thread_id: &str) -> ChatResult<Vec<Message>> {
        self.shared.history(thread_id).await
    }

    async fn summary(&self, thread_id: &str) -> ChatResult<ThreadSummary> {
        let entries = self.shared.entries.read().await;
        entries
            .threads
            .get(thread_id)
            .map(|entry| entry.summary(thread_id))
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))
    }

    async fn list(&self) -> ChatResult<Vec<ThreadSummary>> {
        let entries = self.shared.entries.read().await;
        let mut threads: Vec<_> = entries.threads.iter().collect();
        threads.sort_by(|(_, a), (_, b)| b.sequence.cmp(&a.sequence));
        Ok(threads
            .into_iter()
            .map(|(id, entry)| entry.summary(id))
            .collect())
    }

    async fn delete(&self, thread_id: &str) -> ChatResult<()> {
        let mut entries = self.shared.entries.write().await;
        entries
            .threads
            .remove(thread_id)
            .map(|_| ())
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))
    }

    async fn set_title(&self, thread_id: &str, title: &str) -> ChatResult<ThreadSummary> {
        let mut entries = self.shared.entries.write().await;
        let entry = entries
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;
        entry.title = Some(title.to_string());
        entry.explicit_title = true;
        Ok(entry.summary(thread_id))
    }

    async fn checkpoint(&self, thread_id: &str) -> ChatResult<CheckpointHandle> {
        self.summary(thread_id).await?;
        Ok(self.handle(thread_id))
    }
}
