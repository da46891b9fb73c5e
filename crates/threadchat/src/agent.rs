use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::event::RawEvent;
use crate::models::message::Message;

/// An LLM-backed agent that answers one user input on one thread as a stream of raw events.
///
/// The stream is finite: it ends after the agent signals the end of the turn (or simply runs
/// out). It is consumed exactly once.
#[async_trait]
pub trait StreamingAgent: Send + Sync {
    async fn invoke(
        &self,
        thread_id: &str,
        input: &str,
    ) -> Result<BoxStream<'_, Result<RawEvent>>>;

    /// Answer a full user message, attachments included. Agents that cannot take
    /// attachments answer its text.
    async fn invoke_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<BoxStream<'_, Result<RawEvent>>> {
        self.invoke(thread_id, &message.text()).await
    }
}
