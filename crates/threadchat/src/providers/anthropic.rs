use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::base::{AgentProvider, ConfigSchema, Condition, OptionSpec, ProviderOptions};
use super::tool_loop::{run_turn, ChatApi, RoundTranslator};
use super::tools::{parse_arguments, result_text, ToolRequest, WebSearch, WEB_SEARCH};
use super::utils::{chat_messages, http_client, streaming_option};
use crate::agent::StreamingAgent;
use crate::models::event::{RawEvent, RawEventKind};
use crate::models::message::Message;
use crate::store::CheckpointHandle;

pub const ANTHROPIC_AGENT: &str = "Anthropic Agent";
const DEFAULT_HOST: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
];

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: i64,
    /// Extended thinking budget, when thinking is enabled
    pub thinking_budget: Option<i64>,
    pub streaming: bool,
}

impl AnthropicConfig {
    fn from_options(host: String, api_key: String, options: &ProviderOptions) -> Result<Self> {
        let model = options
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing option: model"))?;
        let max_tokens = options
            .get("max_tokens")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("missing option: max_tokens"))?;
        let thinking_enabled = options
            .get("thinking_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            host,
            api_key,
            model: model.to_string(),
            temperature: options.get("temperature").and_then(Value::as_f64),
            max_tokens,
            thinking_budget: if thinking_enabled {
                options.get("thinking_budget").and_then(Value::as_i64)
            } else {
                None
            },
            streaming: options
                .get("streaming")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        })
    }
}

/// Claude through the Messages API. Credentials come from `ANTHROPIC_API_KEY`, the endpoint
/// from `ANTHROPIC_HOST` unless set explicitly.
#[derive(Debug, Default, Clone)]
pub struct AnthropicProvider {
    host: Option<String>,
    api_key: Option<String>,
    search_host: Option<String>,
}

impl AnthropicProvider {
    pub fn with_credentials(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            api_key: Some(api_key.into()),
            search_host: None,
        }
    }

    /// Send the agents' web searches to `host` instead of DuckDuckGo.
    pub fn with_search_host(mut self, host: impl Into<String>) -> Self {
        self.search_host = Some(host.into());
        self
    }
}

impl AgentProvider for AnthropicProvider {
    fn name(&self) -> &str {
        ANTHROPIC_AGENT
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            OptionSpec::choice("model", "Model", ANTHROPIC_MODELS, ANTHROPIC_MODELS[0])
                .with_help("Claude model to use"),
            OptionSpec::float("temperature", "Temperature", 0.0, 1.0, 0.1, 1.0)
                .with_help("Higher values make the output more random"),
            OptionSpec::integer("max_tokens", "Max Tokens", 1024, 8192, 512, 5000)
                .with_help("Maximum number of tokens in the response"),
            OptionSpec::toggle("thinking_enabled", "Enable Extended Thinking", false)
                .with_help("Let the model reason before answering"),
            OptionSpec::integer("thinking_budget", "Thinking Budget", 500, 10000, 500, 2000)
                .with_help("Tokens the model may spend thinking")
                .visible_when(Condition::Equals {
                    key: "thinking_enabled".to_string(),
                    value: json!(true),
                }),
            streaming_option(),
        ])
    }

    fn build(
        &self,
        checkpoint: CheckpointHandle,
        options: &ProviderOptions,
    ) -> Result<Box<dyn StreamingAgent>> {
        let options = self.config_schema().resolve(options)?;
        let host = match &self.host {
            Some(host) => host.clone(),
            None => std::env::var("ANTHROPIC_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        };
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => std::env::var("ANTHROPIC_API_KEY")
                .context("ANTHROPIC_API_KEY must be set to use the Anthropic Agent")?,
        };

        let config = AnthropicConfig::from_options(host, api_key, &options)?;
        let agent = AnthropicAgent::new(config, checkpoint)?;
        Ok(Box::new(match &self.search_host {
            Some(host) => agent.with_search_host(host),
            None => agent,
        }))
    }
}

pub struct AnthropicAgent {
    client: Client,
    config: AnthropicConfig,
    checkpoint: CheckpointHandle,
    search: WebSearch,
}

impl AnthropicAgent {
    pub fn new(config: AnthropicConfig, checkpoint: CheckpointHandle) -> Result<Self> {
        let client = http_client()?;
        Ok(Self {
            search: WebSearch::from_env(client.clone()),
            client,
            config,
            checkpoint,
        })
    }

    pub fn with_search_host(mut self, host: &str) -> Self {
        self.search = WebSearch::new(self.client.clone(), host);
        self
    }

    fn payload(&self, messages: &[Value], streaming: bool, allow_tools: bool) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "stream": streaming,
            "tools": [{
                "name": WEB_SEARCH,
                "description": WebSearch::description(),
                "input_schema": WebSearch::input_schema(),
            }],
        });
        if !allow_tools {
            payload["tool_choice"] = json!({"type": "none"});
        }
        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(budget) = self.config.thinking_budget {
            payload["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        payload
    }
}

impl ChatApi for AnthropicAgent {
    type Translator = AnthropicStreamTranslator;

    fn request(&self, messages: &[Value], streaming: bool, allow_tools: bool) -> RequestBuilder {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.payload(messages, streaming, allow_tools))
    }
}

#[async_trait]
impl StreamingAgent for AnthropicAgent {
    async fn invoke(
        &self,
        thread_id: &str,
        input: &str,
    ) -> Result<BoxStream<'_, Result<RawEvent>>> {
        let message = Message::user().with_text(input);
        self.invoke_message(thread_id, &message).await
    }

    async fn invoke_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<BoxStream<'_, Result<RawEvent>>> {
        if thread_id != self.checkpoint.thread_id() {
            bail!(
                "agent is bound to thread {}, not {}",
                self.checkpoint.thread_id(),
                thread_id
            );
        }
        let history = self.checkpoint.history().await?;
        let messages = chat_messages(&history, message, image_block);
        tracing::debug!("Asking {} on thread {}", self.config.model, thread_id);
        Ok(run_turn(self, &self.search, self.config.streaming, messages))
    }
}

fn image_block(media_type: &str, data: &str) -> Value {
    json!({
        "type": "image",
        "source": {"type": "base64", "media_type": media_type, "data": data},
    })
}

/// Maps Messages API events to raw events and keeps the content blocks of the answer, which
/// go back to the API when the answer asks for tools.
#[derive(Debug, Default)]
pub struct AnthropicStreamTranslator {
    // Content blocks by index, as sent back to the API
    blocks: BTreeMap<u64, Value>,
    // Content block index -> streamed tool input
    tool_inputs: BTreeMap<u64, String>,
    done: bool,
}

impl AnthropicStreamTranslator {
    fn block_start(&mut self, data: &Value) -> Result<Option<RawEvent>> {
        let index = block_index(data)?;
        let block = &data["content_block"];
        self.blocks.insert(index, block.clone());
        let raw = match block["type"].as_str().unwrap_or_default() {
            "text" => non_empty(&block["text"]).map(RawEvent::text),
            "thinking" => non_empty(&block["thinking"]).map(RawEvent::reasoning),
            "tool_use" => {
                let id = block["id"]
                    .as_str()
                    .ok_or_else(|| anyhow!("tool_use block without id"))?;
                let name = block["name"].as_str().unwrap_or_default();
                self.tool_inputs.insert(index, String::new());
                // The input arrives as input_json_delta fragments.
                Some(RawEvent::tool_start_with_id(id, name, ""))
            }
            other => Some(unsupported(&format!("content_block.{}", other), data.clone())),
        };
        Ok(raw)
    }

    fn block_delta(&mut self, data: &Value) -> Result<Option<RawEvent>> {
        let index = block_index(data)?;
        let delta = &data["delta"];
        let raw = match delta["type"].as_str().unwrap_or_default() {
            "text_delta" => {
                self.extend_block(index, "text", &delta["text"]);
                non_empty(&delta["text"]).map(RawEvent::text)
            }
            "thinking_delta" => {
                self.extend_block(index, "thinking", &delta["thinking"]);
                non_empty(&delta["thinking"]).map(RawEvent::reasoning)
            }
            "input_json_delta" => {
                let fragment = delta["partial_json"].as_str().unwrap_or_default();
                let input = self
                    .tool_inputs
                    .get_mut(&index)
                    .ok_or_else(|| anyhow!("input_json_delta for unknown block {}", index))?;
                input.push_str(fragment);
                let id = self
                    .blocks
                    .get(&index)
                    .and_then(|block| block["id"].as_str())
                    .unwrap_or_default();
                Some(RawEvent::tool_args_for(id, fragment))
            }
            "signature_delta" => {
                self.extend_block(index, "signature", &delta["signature"]);
                None
            }
            other => Some(unsupported(&format!("delta.{}", other), data.clone())),
        };
        Ok(raw)
    }

    fn extend_block(&mut self, index: u64, field: &str, fragment: &Value) {
        let Some(fragment) = fragment.as_str() else {
            return;
        };
        if let Some(block) = self.blocks.get_mut(&index) {
            let text = format!("{}{}", block[field].as_str().unwrap_or_default(), fragment);
            block[field] = Value::String(text);
        }
    }

    /// Content blocks of the answer with tool inputs parsed. Empty text blocks are dropped,
    /// the API refuses them.
    fn content(&self) -> Vec<Value> {
        self.blocks
            .iter()
            .filter(|(_, block)| !(block["type"] == "text" && non_empty(&block["text"]).is_none()))
            .map(|(index, block)| {
                let mut block = block.clone();
                if let Some(input) = self.tool_inputs.get(index) {
                    block["input"] = parse_arguments(input);
                }
                block
            })
            .collect()
    }
}

impl RoundTranslator for AnthropicStreamTranslator {
    fn translate(&mut self, event: &str, data: &str) -> Result<Vec<RawEvent>> {
        let data: Value = serde_json::from_str(data)
            .with_context(|| format!("Invalid stream event: {}", data))?;
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(event)
            .to_string();

        let raw = match kind.as_str() {
            "message_start" | "message_delta" | "content_block_stop" | "ping" => None,
            "content_block_start" => self.block_start(&data)?,
            "content_block_delta" => self.block_delta(&data)?,
            "message_stop" => {
                self.done = true;
                None
            }
            "error" => {
                let message = data["error"]["message"].as_str().unwrap_or("Unknown error");
                bail!("Anthropic stream error: {}", message)
            }
            other => Some(unsupported(other, data.clone())),
        };
        Ok(raw.into_iter().collect())
    }

    fn translate_response(&mut self, response: &Value) -> Result<Vec<RawEvent>> {
        let blocks = response["content"]
            .as_array()
            .ok_or_else(|| anyhow!("Response without content: {}", response))?;

        let mut raw = Vec::new();
        for (index, block) in blocks.iter().enumerate() {
            self.blocks.insert(index as u64, block.clone());
            match block["type"].as_str().unwrap_or_default() {
                "text" => raw.extend(non_empty(&block["text"]).map(RawEvent::text)),
                "thinking" => raw.extend(non_empty(&block["thinking"]).map(RawEvent::reasoning)),
                "tool_use" => {
                    let id = block["id"]
                        .as_str()
                        .ok_or_else(|| anyhow!("tool_use block without id"))?;
                    let name = block["name"].as_str().unwrap_or_default();
                    raw.push(RawEvent::tool_start_with_id(id, name, block["input"].clone()));
                }
                other => raw.push(unsupported(
                    &format!("content_block.{}", other),
                    block.clone(),
                )),
            }
        }
        self.done = true;
        Ok(raw)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn tool_requests(&self) -> Vec<ToolRequest> {
        self.content()
            .into_iter()
            .filter(|block| block["type"] == "tool_use")
            .map(|block| ToolRequest {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                arguments: block["input"].clone(),
            })
            .collect()
    }

    fn continuation(&self, results: &[(ToolRequest, Value)]) -> Vec<Value> {
        let tool_results: Vec<Value> = results
            .iter()
            .map(|(request, result)| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": request.id,
                    "content": result_text(result),
                })
            })
            .collect();
        vec![
            json!({"role": "assistant", "content": self.content()}),
            json!({"role": "user", "content": tool_results}),
        ]
    }
}

fn block_index(data: &Value) -> Result<u64> {
    data["index"]
        .as_u64()
        .ok_or_else(|| anyhow!("content block event without index"))
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

fn unsupported(kind: &str, payload: Value) -> RawEvent {
    RawEvent::new(
        RawEventKind::Unsupported(format!("anthropic.{}", kind)),
        payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessagePart;
    use crate::normalizer::normalize;
    use crate::store::{MemoryThreadStore, ThreadStore};
    use futures::TryStreamExt;
    use wiremock::matchers::{
        body_partial_json, body_string_contains, header, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(events: &[(&str, Value)]) -> String {
        events
            .iter()
            .map(|(name, data)| format!("event: {}\ndata: {}\n\n", name, data))
            .collect()
    }

    fn event_stream(events: &[(&str, Value)]) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(sse(events), "text/event-stream")
    }

    fn translate_all(
        translator: &mut AnthropicStreamTranslator,
        events: &[(&str, Value)],
    ) -> Result<Vec<RawEvent>> {
        let mut out = Vec::new();
        for (name, data) in events {
            out.extend(translator.translate(name, &data.to_string())?);
        }
        Ok(out)
    }

    fn tool_use_stream() -> Vec<(&'static str, Value)> {
        vec![
            ("message_start", json!({"type": "message_start", "message": {}})),
            ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Let me look"}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "abc"}})),
            ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
            ("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Hel"}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "lo"}})),
            ("content_block_start", json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "web_search", "input": {}}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{\"query\":"}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "\"rust 1.0\"}"}})),
            ("ping", json!({"type": "ping"})),
            ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}})),
            ("message_stop", json!({"type": "message_stop"})),
        ]
    }

    fn text_stream(text: &str) -> Vec<(&'static str, Value)> {
        vec![
            ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}})),
            ("message_stop", json!({"type": "message_stop"})),
        ]
    }

    #[test]
    fn test_translates_blocks_to_raw_events() -> Result<()> {
        let mut translator = AnthropicStreamTranslator::default();
        let raw = translate_all(&mut translator, &tool_use_stream())?;
        assert_eq!(
            raw,
            vec![
                RawEvent::reasoning("Let me look"),
                RawEvent::text("Hel"),
                RawEvent::text("lo"),
                RawEvent::tool_start_with_id("toolu_1", "web_search", ""),
                RawEvent::tool_args_for("toolu_1", "{\"query\":"),
                RawEvent::tool_args_for("toolu_1", "\"rust 1.0\"}"),
            ]
        );
        assert!(translator.is_done());
        assert_eq!(
            translator.tool_requests(),
            vec![ToolRequest {
                id: "toolu_1".to_string(),
                name: WEB_SEARCH.to_string(),
                arguments: json!({"query": "rust 1.0"}),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_continuation_sends_blocks_back() -> Result<()> {
        let mut translator = AnthropicStreamTranslator::default();
        translate_all(&mut translator, &tool_use_stream())?;
        let requests = translator.tool_requests();
        let messages = translator.continuation(&[(requests[0].clone(), json!("May 2015"))]);
        assert_eq!(
            messages,
            vec![
                json!({"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "Let me look", "signature": "abc"},
                    {"type": "text", "text": "Hello"},
                    {"type": "tool_use", "id": "toolu_1", "name": "web_search", "input": {"query": "rust 1.0"}},
                ]}),
                json!({"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "May 2015"},
                ]}),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unknown_event_is_forwarded_as_unsupported() -> Result<()> {
        let mut translator = AnthropicStreamTranslator::default();
        let raw = translate_all(&mut translator, &[("citations", json!({"type": "citations"}))])?;
        assert_eq!(
            raw[0].kind,
            RawEventKind::Unsupported("anthropic.citations".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_error_event_fails() {
        let mut translator = AnthropicStreamTranslator::default();
        let result = translate_all(
            &mut translator,
            &[(
                "error",
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            )],
        );
        assert!(result.unwrap_err().to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn test_invoke_streams_with_history() -> Result<()> {
        let store = MemoryThreadStore::new();
        let (summary, checkpoint) = store.create().await?;
        store
            .append(
                &summary.id,
                &[
                    Message::user().with_text("Hi"),
                    Message::assistant().with_thinking("greeting").with_text("Hello!"),
                ],
            )
            .await?;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-5-haiku-20241022",
                "stream": true,
                "thinking": {"type": "enabled", "budget_tokens": 1500},
                "messages": [
                    {"role": "user", "content": "Hi"},
                    {"role": "assistant", "content": "Hello!"},
                    {"role": "user", "content": "Again?"},
                ],
            })))
            .respond_with(event_stream(&text_stream("Sure")))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::with_credentials(server.uri(), "test_api_key");
        let options = json!({
            "model": "claude-3-5-haiku-20241022",
            "thinking_enabled": true,
            "thinking_budget": 1500,
        });
        let agent = provider.build(checkpoint, options.as_object().unwrap())?;
        let events: Vec<RawEvent> = agent.invoke(&summary.id, "Again?").await?.try_collect().await?;
        assert_eq!(events, vec![RawEvent::text("Sure"), RawEvent::turn_end()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_web_search_round_trip() -> Result<()> {
        let store = MemoryThreadStore::new();
        let (summary, checkpoint) = store.create().await?;
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_string_contains("\"tool_use_id\":\"toolu_1\""))
            .respond_with(event_stream(&text_stream("In May 2015.")))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_string_contains("\"input_schema\""))
            .respond_with(event_stream(&tool_use_stream()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust 1.0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"AbstractText": "Rust 1.0 shipped in May 2015."})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let agent = AnthropicProvider::with_credentials(server.uri(), "test_api_key")
            .with_search_host(server.uri())
            .build(checkpoint, &ProviderOptions::new())?;
        let events: Vec<RawEvent> = agent
            .invoke(&summary.id, "When did Rust 1.0 ship?")
            .await?
            .try_collect()
            .await?;
        assert_eq!(
            events[events.len() - 3..],
            [
                RawEvent::tool_end_for("toolu_1", json!("Rust 1.0 shipped in May 2015.")),
                RawEvent::text("In May 2015."),
                RawEvent::turn_end(),
            ]
        );

        let (_, message) = normalize(events)?;
        assert_eq!(
            message.parts[2],
            MessagePart::tool_call(
                "toolu_1",
                "web_search",
                json!({"query": "rust 1.0"}),
                Some(json!("Rust 1.0 shipped in May 2015."))
            )
        );
        assert_eq!(message.text(), "Hello\nIn May 2015.");
        Ok(())
    }

    #[tokio::test]
    async fn test_non_streaming_request_with_image() -> Result<()> {
        let store = MemoryThreadStore::new();
        let (summary, checkpoint) = store.create().await?;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "stream": false,
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "What is this?"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBORw0KGgo="}},
                ]}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "message",
                "content": [{"type": "text", "text": "A tiny PNG."}],
                "stop_reason": "end_turn",
            })))
            .mount(&server)
            .await;

        let agent = AnthropicProvider::with_credentials(server.uri(), "test_api_key")
            .build(checkpoint, json!({"streaming": false}).as_object().unwrap())?;
        let message = Message::user()
            .with_text("What is this?")
            .with_image("image/png", "iVBORw0KGgo=");
        let events: Vec<RawEvent> = agent
            .invoke_message(&summary.id, &message)
            .await?
            .try_collect()
            .await?;
        assert_eq!(events, vec![RawEvent::text("A tiny PNG."), RawEvent::turn_end()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_invoke_reports_http_errors() -> Result<()> {
        let store = MemoryThreadStore::new();
        let (summary, checkpoint) = store.create().await?;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let agent = AnthropicProvider::with_credentials(server.uri(), "bad")
            .build(checkpoint, &ProviderOptions::new())?;
        let result: Result<Vec<RawEvent>> = agent.invoke(&summary.id, "Hi").await?.try_collect().await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid x-api-key"));
        Ok(())
    }

    #[test]
    fn test_schema_defaults() {
        let resolved = AnthropicProvider::default()
            .config_schema()
            .resolve(&ProviderOptions::new())
            .unwrap();
        assert_eq!(resolved["max_tokens"], json!(5000));
        assert_eq!(resolved["temperature"], json!(1.0));
        assert_eq!(resolved["streaming"], json!(true));
        assert!(!resolved.contains_key("thinking_budget"));
    }
}
