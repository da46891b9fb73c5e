use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use threadchat::agent::StreamingAgent;
use threadchat::controller::ThreadController;
use threadchat::errors::ChatError;
use threadchat::models::event::{DisplayEvent, RawEvent, RawEventKind};
use threadchat::models::message::{MessagePart, Role};
use threadchat::providers::scripted::ScriptedProvider;
use threadchat::providers::{AgentProvider, ProviderOptions};
use threadchat::sink::{RenderSink, SinkError, Transcript};
use threadchat::store::{FileThreadStore, MemoryThreadStore, ThreadStore};

/// Drives turns against one controller with scripted agents
struct TurnTester {
    controller: ThreadController,
}

impl TurnTester {
    fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            controller: ThreadController::new(store),
        }
    }

    fn in_memory() -> Self {
        Self::new(Arc::new(MemoryThreadStore::new()))
    }

    async fn scripted(&self, thread_id: &str, script: Vec<RawEvent>) -> Result<Box<dyn StreamingAgent>> {
        let checkpoint = self.controller.store().checkpoint(thread_id).await?;
        ScriptedProvider::new("scripted", script).build(checkpoint, &ProviderOptions::new())
    }

    async fn run(
        &self,
        thread_id: &str,
        input: &str,
        script: Vec<RawEvent>,
        sink: &mut dyn RenderSink,
    ) -> Result<threadchat::controller::TurnOutcome, threadchat::errors::TurnError> {
        let agent = self
            .scripted(thread_id, script)
            .await
            .expect("scripted agent");
        let (_tx, rx) = watch::channel(false);
        self.controller
            .submit_turn(thread_id, input, agent.as_ref(), sink, rx)
            .await
    }
}

#[tokio::test]
async fn test_select_after_submit_shows_exactly_the_turn() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;

    let outcome = tester
        .run(
            &thread.id,
            "What is up?",
            vec![RawEvent::reasoning("hmm"), RawEvent::text("Not much")],
            &mut Transcript::new(),
        )
        .await?;

    let first = tester.controller.select_thread(&thread.id).await?;
    let second = tester.controller.select_thread(&thread.id).await?;
    assert_eq!(first.messages, second.messages);

    let last_two = &first.messages[first.messages.len() - 2..];
    assert_eq!(last_two[0].role, Role::User);
    assert_eq!(last_two[0].text(), "What is up?");
    assert_eq!(last_two[1], outcome.message);
    assert_eq!(first.title, "What is up?");
    Ok(())
}

#[tokio::test]
async fn test_deleted_thread_is_gone() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;
    tester.controller.delete_thread(&thread.id).await?;

    assert_eq!(
        tester.controller.select_thread(&thread.id).await.err(),
        Some(ChatError::ThreadNotFound(thread.id.clone()))
    );
    assert_eq!(
        tester.controller.delete_thread(&thread.id).await.err(),
        Some(ChatError::ThreadNotFound(thread.id.clone()))
    );
    assert!(tester.controller.list_threads().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_streamed_tool_call_scenario() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;
    let mut sink = Transcript::new();

    let outcome = tester
        .run(
            &thread.id,
            "find x",
            vec![
                RawEvent::text("Hel"),
                RawEvent::text("lo"),
                RawEvent::tool_start("search", ""),
                RawEvent::tool_args("{\"q\":"),
                RawEvent::tool_args("\"x\"}"),
                RawEvent::tool_end(json!(["r1"])),
                RawEvent::turn_end(),
            ],
            &mut sink,
        )
        .await?;

    assert_eq!(
        sink.events,
        vec![
            DisplayEvent::text("Hel"),
            DisplayEvent::text("lo"),
            DisplayEvent::ToolCallStart {
                call_id: "call_0".to_string(),
                name: "search".to_string(),
                arguments: json!({"q": "x"}),
            },
            DisplayEvent::ToolCallResult {
                call_id: "call_0".to_string(),
                result: json!(["r1"]),
            },
            DisplayEvent::TurnComplete,
        ]
    );
    assert_eq!(
        outcome.message.parts,
        vec![
            MessagePart::text("Hello"),
            MessagePart::tool_call("call_0", "search", json!({"q": "x"}), Some(json!(["r1"]))),
        ]
    );
    Ok(())
}

/// Requests cancellation once it has accepted `after` text deltas.
struct CancellingSink {
    cancel: watch::Sender<bool>,
    after: usize,
    seen: Vec<DisplayEvent>,
}

impl RenderSink for CancellingSink {
    fn accept(&mut self, event: &DisplayEvent) -> Result<(), SinkError> {
        self.seen.push(event.clone());
        let texts = self
            .seen
            .iter()
            .filter(|e| matches!(e, DisplayEvent::TextDelta { .. }))
            .count();
        if texts == self.after {
            let _ = self.cancel.send(true);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_cancel_after_second_delta_commits_nothing() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;
    let agent = tester
        .scripted(
            &thread.id,
            vec![
                RawEvent::text("one "),
                RawEvent::text("two "),
                RawEvent::text("three"),
                RawEvent::turn_end(),
            ],
        )
        .await?;

    let (tx, rx) = watch::channel(false);
    let mut sink = CancellingSink {
        cancel: tx,
        after: 2,
        seen: Vec::new(),
    };
    let err = tester
        .controller
        .submit_turn(&thread.id, "count", agent.as_ref(), &mut sink, rx)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.events_forwarded, 2);
    assert_eq!(sink.seen.len(), 2);
    assert!(tester.controller.store().load(&thread.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_tool_start_without_result_is_not_committed() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;

    let err = tester
        .run(
            &thread.id,
            "go",
            vec![
                RawEvent::tool_start_with_id("t1", "fetch", json!({"url": "x"})),
                RawEvent::turn_end(),
            ],
            &mut Transcript::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.source, ChatError::IncompleteToolCall("t1".to_string()));
    assert_eq!(err.events_forwarded, 1);
    assert!(tester.controller.store().load(&thread.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_result_without_start_fails() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;

    let err = tester
        .run(
            &thread.id,
            "go",
            vec![RawEvent::text("a"), RawEvent::tool_end_for("ghost", json!(1))],
            &mut Transcript::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.source, ChatError::UnmatchedToolResult("ghost".to_string()));
    assert_eq!(err.last_event_index, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_events_are_counted() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;

    let outcome = tester
        .run(
            &thread.id,
            "hi",
            vec![
                RawEvent::new(RawEventKind::from("citation"), json!({"url": "x"})),
                RawEvent::text("ok"),
                RawEvent::new(RawEventKind::from("usage"), json!({"tokens": 3})),
            ],
            &mut Transcript::new(),
        )
        .await?;

    assert_eq!(outcome.unsupported_events, 2);
    assert_eq!(outcome.message.text(), "ok");
    Ok(())
}

/// Echoes its input slowly, one word per tick.
struct SlowEcho;

#[async_trait]
impl StreamingAgent for SlowEcho {
    async fn invoke(&self, _thread_id: &str, input: &str) -> Result<BoxStream<'_, Result<RawEvent>>> {
        let words: Vec<String> = input.split(' ').map(|w| format!("{} ", w)).collect();
        Ok(stream::iter(words)
            .then(|word| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(RawEvent::text(word))
            })
            .boxed())
    }
}

#[tokio::test]
async fn test_turns_on_one_thread_are_serialized() -> Result<()> {
    let tester = TurnTester::in_memory();
    let thread = tester.controller.create_thread().await?;
    let (_tx, rx) = watch::channel(false);
    let (mut a, mut b) = (Transcript::new(), Transcript::new());

    let (first, second) = tokio::join!(
        tester
            .controller
            .submit_turn(&thread.id, "alpha beta", &SlowEcho, &mut a, rx.clone()),
        tester
            .controller
            .submit_turn(&thread.id, "gamma delta", &SlowEcho, &mut b, rx.clone()),
    );
    first?;
    second?;

    let messages = tester.controller.store().load(&thread.id).await?;
    assert_eq!(messages.len(), 4);
    for pair in messages.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].text().trim(), pair[0].text());
    }
    Ok(())
}

#[tokio::test]
async fn test_file_backed_threads_survive_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let thread_id = {
        let tester = TurnTester::new(Arc::new(FileThreadStore::open(dir.path()).await?));
        let thread = tester.controller.create_thread().await?;
        tester
            .run(&thread.id, "remember me", vec![RawEvent::text("noted")], &mut Transcript::new())
            .await?;
        thread.id
    };

    let tester = TurnTester::new(Arc::new(FileThreadStore::open(dir.path()).await?));
    let threads = tester.controller.list_threads().await?;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].title, "remember me");

    let thread = tester.controller.select_thread(&thread_id).await?;
    assert_eq!(thread.messages[1].text(), "noted");
    assert_eq!(thread.checkpoint.history().await?, thread.messages);
    Ok(())
}
