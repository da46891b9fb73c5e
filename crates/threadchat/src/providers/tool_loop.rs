//! The request loop shared by the built-in agents.
//!
//! A turn is one or more rounds. Each round sends the conversation to the provider and turns
//! its answer into raw events. When the answer asks for tools, the calls run, their results
//! are emitted as `tool-end` events and appended to the conversation, and the next round
//! starts. The turn ends once a round asks for no tools.
use anyhow::{bail, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::RequestBuilder;
use reqwest_eventsource::Event;
use serde_json::Value;

use super::tools::{ToolRequest, WebSearch};
use super::utils::{open_event_source, send_request, stream_error};
use crate::models::event::RawEvent;

/// Rounds that may request tools. The round after them must answer without tools.
pub const MAX_TOOL_ROUNDS: usize = 4;

/// Provider wire format of one round.
pub trait RoundTranslator: Default + Send {
    /// One server-sent event of a streamed answer.
    fn translate(&mut self, event: &str, data: &str) -> Result<Vec<RawEvent>>;

    /// A complete, non-streamed answer.
    fn translate_response(&mut self, response: &Value) -> Result<Vec<RawEvent>>;

    /// The provider signalled the end of its answer.
    fn is_done(&self) -> bool;

    fn tool_requests(&self) -> Vec<ToolRequest>;

    /// Messages that carry this round's tool calls and their results back to the provider.
    fn continuation(&self, results: &[(ToolRequest, Value)]) -> Vec<Value>;
}

/// Provider endpoint of one round.
pub trait ChatApi: Send + Sync {
    type Translator: RoundTranslator;

    /// The request for one round over `messages`. With `allow_tools` false the provider is told
    /// not to call tools.
    fn request(&self, messages: &[Value], streaming: bool, allow_tools: bool) -> RequestBuilder;
}

/// Run a whole turn over `messages` as a stream of raw events ending in `turn-end`.
pub fn run_turn<'a, A: ChatApi>(
    api: &'a A,
    search: &'a WebSearch,
    streaming: bool,
    mut messages: Vec<Value>,
) -> BoxStream<'a, Result<RawEvent>> {
    Box::pin(async_stream::try_stream! {
        let mut round = 0;
        loop {
            let allow_tools = round < MAX_TOOL_ROUNDS;
            let request = api.request(&messages, streaming, allow_tools);
            let mut translator = A::Translator::default();

            if streaming {
                let mut source = open_event_source(request).await?;
                while let Some(event) = source.next().await {
                    match event {
                        Ok(Event::Open) => {}
                        Ok(Event::Message(message)) => {
                            for raw in translator.translate(&message.event, &message.data)? {
                                yield raw;
                            }
                            if translator.is_done() {
                                break;
                            }
                        }
                        Err(reqwest_eventsource::Error::StreamEnded) => break,
                        Err(e) => {
                            source.close();
                            Err::<(), _>(stream_error(e).await)?;
                        }
                    }
                }
                source.close();
            } else {
                let response = send_request(request).await?;
                for raw in translator.translate_response(&response)? {
                    yield raw;
                }
            }

            let requests = translator.tool_requests();
            if requests.is_empty() {
                break;
            }
            if !allow_tools {
                bail_round(round)?;
            }

            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                let result = search.dispatch(&request).await;
                yield RawEvent::tool_end_for(request.id.as_str(), result.clone());
                results.push((request, result));
            }
            messages.extend(translator.continuation(&results));
            round += 1;
            tracing::debug!("Tool round {} done, asking again", round);
        }
        yield RawEvent::turn_end();
    })
}

fn bail_round(round: usize) -> Result<()> {
    bail!("Agent still asked for tools after {} rounds", round)
}
