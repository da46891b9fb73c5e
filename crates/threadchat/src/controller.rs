//! Thread lifecycle and turn execution.
//!
//! The controller is the only component that talks to the store, the agent, the normalizer and
//! the render sink together. A turn is committed with a single store append once the agent's
//! output normalized to a complete message; anything else leaves the thread as it was.
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::agent::StreamingAgent;
use crate::errors::{ChatError, ChatResult, TurnError};
use crate::models::event::{DisplayEvent, RawEvent};
use crate::models::message::{Message, Role};
use crate::models::thread::{Thread, ThreadSummary};
use crate::normalizer::{replay_message, Normalizer};
use crate::sink::RenderSink;
use crate::store::ThreadStore;

/// A committed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The assistant message as stored
    pub message: Message,
    /// Raw events of a kind the normalizer does not know
    pub unsupported_events: usize,
    /// The thread after the commit, with its possibly new title
    pub thread: ThreadSummary,
}

pub struct ThreadController {
    store: Arc<dyn ThreadStore>,
    // One async lock per thread: turns on a thread run one at a time.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadController {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub async fn create_thread(&self) -> ChatResult<Thread> {
        let (summary, checkpoint) = self.store.create().await?;
        debug!("Created thread {}", summary.id);
        Ok(Thread {
            id: summary.id,
            title: summary.title,
            messages: Vec::new(),
            updated_at: summary.updated_at,
            checkpoint,
        })
    }

    /// Most recently updated first.
    pub async fn list_threads(&self) -> ChatResult<Vec<ThreadSummary>> {
        self.store.list().await
    }

    pub async fn select_thread(&self, thread_id: &str) -> ChatResult<Thread> {
        let summary = self.store.summary(thread_id).await?;
        let messages = self.store.load(thread_id).await?;
        let checkpoint = self.store.checkpoint(thread_id).await?;
        Ok(Thread {
            id: summary.id,
            title: summary.title,
            messages,
            updated_at: summary.updated_at,
            checkpoint,
        })
    }

    /// Show the history of `thread` on `sink`: user messages through
    /// [`RenderSink::user_message`], assistant messages as display events closed by
    /// `TurnComplete`. Returns the number of display events accepted.
    pub fn replay(&self, thread: &Thread, sink: &mut dyn RenderSink) -> ChatResult<usize> {
        let mut accepted = 0;
        for message in &thread.messages {
            match message.role {
                Role::User => sink
                    .user_message(message)
                    .map_err(|e| ChatError::SinkRejection(e.to_string()))?,
                Role::Assistant => {
                    for event in replay_message(message) {
                        forward(sink, &event)?;
                        accepted += 1;
                    }
                }
            }
        }
        Ok(accepted)
    }

    /// Remove a thread. Waits for a turn in flight on it to finish first.
    pub async fn delete_thread(&self, thread_id: &str) -> ChatResult<()> {
        let thread_lock = self.thread_lock(thread_id);
        let _guard = thread_lock.lock().await;
        self.store.delete(thread_id).await?;
        lock(&self.locks).remove(thread_id);
        debug!("Deleted thread {}", thread_id);
        Ok(())
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> ChatResult<ThreadSummary> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidOption {
                key: "title".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.store.set_title(thread_id, title).await
    }

    /// Run one turn: stream the agent's answer to `input` through the normalizer into `sink`,
    /// then commit the user input and the assistant message together.
    ///
    /// Setting `cancel` to `true` stops the turn at the next event boundary. A failed or
    /// cancelled turn commits nothing.
    pub async fn submit_turn(
        &self,
        thread_id: &str,
        input: &str,
        agent: &dyn StreamingAgent,
        sink: &mut dyn RenderSink,
        cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutcome, TurnError> {
        let user = Message::user().with_text(input);
        self.submit_message(thread_id, user, agent, sink, cancel).await
    }

    /// [`submit_turn`](Self::submit_turn) for a prepared user message, e.g. one with images.
    pub async fn submit_message(
        &self,
        thread_id: &str,
        user: Message,
        agent: &dyn StreamingAgent,
        sink: &mut dyn RenderSink,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutcome, TurnError> {
        let thread_lock = self.thread_lock(thread_id);
        let _guard = thread_lock.lock().await;

        if let Err(e) = self.store.summary(thread_id).await {
            return Err(TurnError::new(thread_id, 0, e));
        }
        debug!("Starting turn on thread {}", thread_id);

        let mut forwarded = 0;
        let result = match self
            .drive(thread_id, &user, agent, sink, &mut cancel, &mut forwarded)
            .await
        {
            Ok((message, unsupported_events)) => self
                .store
                .append(thread_id, &[user, message.clone()])
                .await
                .map(|thread| TurnOutcome {
                    message,
                    unsupported_events,
                    thread,
                }),
            Err(e) => Err(e),
        };

        result.map_err(|e| TurnError::new(thread_id, forwarded, e))
    }

    async fn drive(
        &self,
        thread_id: &str,
        user: &Message,
        agent: &dyn StreamingAgent,
        sink: &mut dyn RenderSink,
        cancel: &mut watch::Receiver<bool>,
        forwarded: &mut usize,
    ) -> ChatResult<(Message, usize)> {
        if *cancel.borrow() {
            return Err(ChatError::Cancelled);
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(ChatError::Cancelled),
            stream = agent.invoke_message(thread_id, user) => stream.map_err(agent_error)?,
        };

        let mut normalizer = Normalizer::new();
        while !normalizer.is_complete() {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(ChatError::Cancelled),
                next = stream.next() => next,
            };
            let event = match next {
                Some(event) => event.map_err(agent_error)?,
                None => {
                    debug!("Agent stream for thread {} ended without turn-end", thread_id);
                    RawEvent::turn_end()
                }
            };
            for display in normalizer.push(event)? {
                if *cancel.borrow() {
                    return Err(ChatError::Cancelled);
                }
                forward(sink, &display)?;
                *forwarded += 1;
            }
        }

        let unsupported = normalizer.unsupported_events();
        Ok((normalizer.finish()?, unsupported))
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.locks)
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }
}

fn forward(sink: &mut dyn RenderSink, event: &DisplayEvent) -> ChatResult<()> {
    sink.accept(event)
        .map_err(|e| ChatError::SinkRejection(e.to_string()))
}

fn agent_error(e: anyhow::Error) -> ChatError {
    ChatError::Agent(format!("{:#}", e))
}

/// Resolves once `cancel` reads `true`. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::RawEvent;
    use crate::providers::scripted::ScriptedProvider;
    use crate::providers::{AgentProvider, ProviderOptions};
    use crate::sink::{SinkError, Transcript};
    use crate::store::MemoryThreadStore;
    use serde_json::json;

    fn controller() -> ThreadController {
        ThreadController::new(Arc::new(MemoryThreadStore::new()))
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    async fn agent_for(
        controller: &ThreadController,
        thread_id: &str,
        script: Vec<RawEvent>,
    ) -> Box<dyn StreamingAgent> {
        let checkpoint = controller.store().checkpoint(thread_id).await.unwrap();
        ScriptedProvider::new("scripted", script)
            .build(checkpoint, &ProviderOptions::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_commits_user_and_assistant() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        let agent = agent_for(
            &controller,
            &thread.id,
            vec![RawEvent::text("Hi "), RawEvent::text("there"), RawEvent::turn_end()],
        )
        .await;

        let mut sink = Transcript::new();
        let outcome = controller
            .submit_turn(&thread.id, "Hello\nsecond line", agent.as_ref(), &mut sink, no_cancel())
            .await?;

        assert_eq!(outcome.message.text(), "Hi there");
        assert_eq!(outcome.thread.title, "Hello");
        assert_eq!(sink.events.len(), 3);

        let selected = controller.select_thread(&thread.id).await?;
        assert_eq!(selected.messages.len(), 2);
        assert_eq!(selected.messages[0].text(), "Hello\nsecond line");
        assert_eq!(selected.messages[1], outcome.message);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_thread() {
        let controller = controller();
        let store = MemoryThreadStore::new();
        let (summary, checkpoint) = store.create().await.unwrap();
        let agent = ScriptedProvider::new("scripted", vec![])
            .build(checkpoint, &ProviderOptions::new())
            .unwrap();

        let err = controller
            .submit_turn(&summary.id, "hi", agent.as_ref(), &mut Transcript::new(), no_cancel())
            .await
            .unwrap_err();
        assert_eq!(err.source, ChatError::ThreadNotFound(summary.id.clone()));
        assert_eq!(err.events_forwarded, 0);
        assert_eq!(err.last_event_index, None);
    }

    #[tokio::test]
    async fn test_agent_error_rolls_back() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        // Bound to a different thread, so invoke fails.
        let other = controller.create_thread().await?;
        let agent = agent_for(&controller, &other.id, vec![RawEvent::text("x")]).await;

        let err = controller
            .submit_turn(&thread.id, "hi", agent.as_ref(), &mut Transcript::new(), no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err.source, ChatError::Agent(_)));
        assert!(controller.store().load(&thread.id).await?.is_empty());
        Ok(())
    }

    struct RejectAfter(usize);

    impl RenderSink for RejectAfter {
        fn accept(&mut self, _event: &DisplayEvent) -> Result<(), SinkError> {
            if self.0 == 0 {
                return Err(SinkError::new("window closed"));
            }
            self.0 -= 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_rejection_aborts_turn() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        let agent = agent_for(
            &controller,
            &thread.id,
            vec![RawEvent::text("a"), RawEvent::reasoning("b"), RawEvent::text("c")],
        )
        .await;

        let err = controller
            .submit_turn(&thread.id, "hi", agent.as_ref(), &mut RejectAfter(2), no_cancel())
            .await
            .unwrap_err();
        assert_eq!(err.source, ChatError::SinkRejection("window closed".to_string()));
        assert_eq!(err.events_forwarded, 2);
        assert_eq!(err.last_event_index, Some(1));
        assert!(controller.store().load(&thread.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_start() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        let agent = agent_for(&controller, &thread.id, vec![RawEvent::text("a")]).await;
        let (_tx, rx) = watch::channel(true);

        let err = controller
            .submit_turn(&thread.id, "hi", agent.as_ref(), &mut Transcript::new(), rx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_emits_assistant_parts() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        let agent = agent_for(
            &controller,
            &thread.id,
            vec![
                RawEvent::tool_start("lookup", json!({"k": 1})),
                RawEvent::tool_end(json!("v")),
                RawEvent::text("v it is"),
            ],
        )
        .await;
        let mut live = Transcript::new();
        controller
            .submit_turn(&thread.id, "hi", agent.as_ref(), &mut live, no_cancel())
            .await?;

        let thread = controller.select_thread(&thread.id).await?;
        let mut replayed = Transcript::new();
        let count = controller.replay(&thread, &mut replayed)?;
        assert_eq!(count, 4);
        assert_eq!(replayed.events, live.events);
        assert_eq!(replayed.user_messages, vec![thread.messages[0].clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_message_keeps_attachments() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        let agent = agent_for(&controller, &thread.id, vec![RawEvent::text("A cat")]).await;
        let user = Message::user()
            .with_text("What is in this picture?")
            .with_image("image/png", "iVBORw0KGgo=");

        let outcome = controller
            .submit_message(&thread.id, user.clone(), agent.as_ref(), &mut Transcript::new(), no_cancel())
            .await?;
        assert_eq!(outcome.thread.title, "What is in this picture?");

        let stored = controller.store().load(&thread.id).await?;
        assert_eq!(stored[0], user);
        assert_eq!(stored[0].images(), vec![("image/png", "iVBORw0KGgo=")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_titles() -> anyhow::Result<()> {
        let controller = controller();
        let thread = controller.create_thread().await?;
        assert!(controller.rename_thread(&thread.id, "   ").await.is_err());
        assert_eq!(
            controller.rename_thread(&thread.id, " Plans ").await?.title,
            "Plans"
        );
        Ok(())
    }
}
