//! Durable thread storage.
//!
//! A store owns two things per thread: its metadata (title, last update) and its checkpoint,
//! the committed message history an agent resumes from. Callers only ever see checkpoints
//! through a [`CheckpointHandle`].
mod file;
mod memory;

pub use file::FileThreadStore;
pub use memory::MemoryThreadStore;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::errors::ChatResult;
use crate::models::message::Message;
use crate::models::thread::ThreadSummary;

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Allocate a new thread with an empty history.
    async fn create(&self) -> ChatResult<(ThreadSummary, CheckpointHandle)>;

    /// Append messages to a thread. Either all of them are stored or none are.
    async fn append(&self, thread_id: &str, messages: &[Message]) -> ChatResult<ThreadSummary>;

    /// Committed messages of a thread, oldest first.
    async fn load(&self, thread_id: &str) -> ChatResult<Vec<Message>>;

    async fn summary(&self, thread_id: &str) -> ChatResult<ThreadSummary>;

    /// All threads, most recently updated first.
    async fn list(&self) -> ChatResult<Vec<ThreadSummary>>;

    /// Remove a thread with its checkpoint state.
    async fn delete(&self, thread_id: &str) -> ChatResult<()>;

    /// Set an explicit title. Explicit titles are never replaced by derived ones.
    async fn set_title(&self, thread_id: &str, title: &str) -> ChatResult<ThreadSummary>;

    async fn checkpoint(&self, thread_id: &str) -> ChatResult<CheckpointHandle>;
}

/// Read access to committed history, implemented by each store's shared state.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    async fn history(&self, thread_id: &str) -> ChatResult<Vec<Message>>;
}

/// Opaque reference to one thread's checkpoint state
#[derive(Clone)]
pub struct CheckpointHandle {
    thread_id: String,
    source: Arc<dyn CheckpointSource>,
}

impl CheckpointHandle {
    pub fn new(thread_id: impl Into<String>, source: Arc<dyn CheckpointSource>) -> Self {
        Self {
            thread_id: thread_id.into(),
            source,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Committed history of the thread this handle belongs to
    pub async fn history(&self) -> ChatResult<Vec<Message>> {
        self.source.history(&self.thread_id).await
    }
}

impl fmt::Debug for CheckpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointHandle")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}
