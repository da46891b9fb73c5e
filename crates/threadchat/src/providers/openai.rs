use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::base::{AgentProvider, ConfigSchema, Condition, OptionSpec, ProviderOptions};
use super::tool_loop::{run_turn, ChatApi, RoundTranslator};
use super::tools::{result_text, ToolRequest, WebSearch, WEB_SEARCH};
use super::utils::{chat_messages, http_client, streaming_option};
use crate::agent::StreamingAgent;
use crate::models::event::{RawEvent, RawEventKind};
use crate::models::message::Message;
use crate::store::CheckpointHandle;

pub const OPENAI_AGENT: &str = "OpenAI Agent";
const DEFAULT_HOST: &str = "https://api.openai.com";

pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "o1",
    "o1-mini",
    "o3-mini",
];

/// Reasoning models take no temperature and count output tokens as completion tokens.
pub const REASONING_MODELS: &[&str] = &["o1", "o1-mini", "o3-mini"];

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: i64,
    pub streaming: bool,
}

impl OpenAiConfig {
    fn from_options(host: String, api_key: String, options: &ProviderOptions) -> Result<Self> {
        let model = options
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing option: model"))?;
        let max_tokens = options
            .get("max_tokens")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("missing option: max_tokens"))?;

        Ok(Self {
            host,
            api_key,
            model: model.to_string(),
            temperature: options.get("temperature").and_then(Value::as_f64),
            max_tokens,
            streaming: options
                .get("streaming")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        })
    }

    fn is_reasoning_model(&self) -> bool {
        REASONING_MODELS.contains(&self.model.as_str())
    }
}

#[derive(Debug, Default, Clone)]
pub struct OpenAiProvider {
    host: Option<String>,
    api_key: Option<String>,
    search_host: Option<String>,
}

impl OpenAiProvider {
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

impl AgentProvider for OpenAiProvider {
    fn name(&self) -> &str {
        OPENAI_AGENT
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new(vec![
            OptionSpec::choice("model", "Model", OPENAI_MODELS, OPENAI_MODELS[0])
                .with_help("OpenAI model to use"),
            OptionSpec::float("temperature", "Temperature", 0.0, 2.0, 0.1, 0.7)
                .with_help("Higher values make the output more random")
                .visible_when(Condition::NotOneOf {
                    key: "model".to_string(),
                    values: REASONING_MODELS.iter().map(|m| json!(m)).collect(),
                }),
            OptionSpec::integer("max_tokens", "Max Tokens", 512, 16384, 512, 4096)
                .with_help("Maximum number of tokens in the response"),
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
            None => std::env::var("OPENAI_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        };
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set to use the OpenAI Agent")?,
        };

        let config = OpenAiConfig::from_options(host, api_key, &options)?;
        let agent = OpenAiAgent::new(config, checkpoint)?;
        Ok(Box::new(match &self.search_host {
            Some(host) => agent.with_search_host(host),
            None => agent,
        }))
    }
}

pub struct OpenAiAgent {
    client: Client,
    config: OpenAiConfig,
    checkpoint: CheckpointHandle,
    search: WebSearch,
}

impl OpenAiAgent {
    pub fn new(config: OpenAiConfig, checkpoint: CheckpointHandle) -> Result<Self> {
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
            "stream": streaming,
            "tools": [{
                "type": "function",
                "function": {
                    "name": WEB_SEARCH,
                    "description": WebSearch::description(),
                    "parameters": WebSearch::input_schema(),
                },
            }],
        });
        if !allow_tools {
            payload["tool_choice"] = json!("none");
        }
        if self.config.is_reasoning_model() {
            payload["max_completion_tokens"] = json!(self.config.max_tokens);
        } else {
            payload["max_tokens"] = json!(self.config.max_tokens);
            if let Some(temperature) = self.config.temperature {
                payload["temperature"] = json!(temperature);
            }
        }
        payload
    }
}

impl ChatApi for OpenAiAgent {
    type Translator = OpenAiStreamTranslator;

    fn request(&self, messages: &[Value], streaming: bool, allow_tools: bool) -> RequestBuilder {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.payload(messages, streaming, allow_tools))
    }
}

#[async_trait]
impl StreamingAgent for OpenAiAgent {
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
        let messages = chat_messages(&history, message, image_url);
        tracing::debug!("Asking {} on thread {}", self.config.model, thread_id);
        Ok(run_turn(self, &self.search, self.config.streaming, messages))
    }
}

fn image_url(media_type: &str, data: &str) -> Value {
    json!({
        "type": "image_url",
        "image_url": {"url": format!("data:{};base64,{}", media_type, data)},
    })
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Maps chat completion chunks to raw events and assembles the answer's tool calls.
#[derive(Debug, Default)]
pub struct OpenAiStreamTranslator {
    content: String,
    // tool_calls[].index -> call
    tool_calls: BTreeMap<u64, PendingCall>,
    done: bool,
}

impl OpenAiStreamTranslator {
    fn tool_call_delta(&mut self, call: &Value) -> Result<Option<RawEvent>> {
        let index = call["index"].as_u64().unwrap_or(0);
        let arguments = call["function"]["arguments"].as_str().unwrap_or_default();

        if let Some(id) = non_empty(&call["id"]) {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            self.tool_calls.insert(
                index,
                PendingCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            );
            return Ok(Some(RawEvent::tool_start_with_id(id, name, arguments)));
        }
        if arguments.is_empty() {
            return Ok(None);
        }
        let pending = self
            .tool_calls
            .get_mut(&index)
            .ok_or_else(|| anyhow!("tool call arguments for unknown index {}", index))?;
        pending.arguments.push_str(arguments);
        Ok(Some(RawEvent::tool_args_for(pending.id.as_str(), arguments)))
    }

    /// Reasoning, text and refusal of a delta or a complete message.
    fn message_text(&mut self, message: &Value, raw: &mut Vec<RawEvent>) {
        if let Some(reasoning) = non_empty(&message["reasoning_content"]) {
            raw.push(RawEvent::reasoning(reasoning));
        }
        if let Some(content) = non_empty(&message["content"]) {
            self.content.push_str(content);
            raw.push(RawEvent::text(content));
        }
        if let Some(refusal) = non_empty(&message["refusal"]) {
            raw.push(RawEvent::new(
                RawEventKind::Unsupported("openai.refusal".to_string()),
                json!({ "text": refusal }),
            ));
        }
    }
}

impl RoundTranslator for OpenAiStreamTranslator {
    fn translate(&mut self, _event: &str, data: &str) -> Result<Vec<RawEvent>> {
        if data.trim() == "[DONE]" {
            self.done = true;
            return Ok(Vec::new());
        }
        let chunk: Value = serde_json::from_str(data)
            .with_context(|| format!("Invalid stream chunk: {}", data))?;
        if let Some(error) = chunk.get("error") {
            let message = error["message"].as_str().unwrap_or("Unknown error");
            bail!("OpenAI stream error: {}", message);
        }

        let mut raw = Vec::new();
        let Some(choice) = chunk["choices"].as_array().and_then(|c| c.first()) else {
            // Usage-only chunks carry no choices.
            return Ok(raw);
        };
        let delta = &choice["delta"];
        self.message_text(delta, &mut raw);
        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                raw.extend(self.tool_call_delta(call)?);
            }
        }
        Ok(raw)
    }

    fn translate_response(&mut self, response: &Value) -> Result<Vec<RawEvent>> {
        let message = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .map(|choice| &choice["message"])
            .ok_or_else(|| anyhow!("Response without choices: {}", response))?;

        let mut raw = Vec::new();
        self.message_text(message, &mut raw);
        if let Some(calls) = message["tool_calls"].as_array() {
            for (index, call) in calls.iter().enumerate() {
                let id = non_empty(&call["id"])
                    .ok_or_else(|| anyhow!("tool call without id: {}", call))?;
                let name = call["function"]["name"].as_str().unwrap_or_default();
                let arguments = call["function"]["arguments"].as_str().unwrap_or_default();
                self.tool_calls.insert(
                    index as u64,
                    PendingCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                );
                raw.push(RawEvent::tool_start_with_id(id, name, arguments));
            }
        }
        self.done = true;
        Ok(raw)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn tool_requests(&self) -> Vec<ToolRequest> {
        self.tool_calls
            .values()
            .map(|call| ToolRequest::from_buffer(&call.id, &call.name, &call.arguments))
            .collect()
    }

    fn continuation(&self, results: &[(ToolRequest, Value)]) -> Vec<Value> {
        let tool_calls: Vec<Value> = self
            .tool_calls
            .values()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
        let content = if self.content.is_empty() {
            Value::Null
        } else {
            Value::String(self.content.clone())
        };

        let mut messages = vec![json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls,
        })];
        messages.extend(results.iter().map(|(request, result)| {
            json!({
                "role": "tool",
                "tool_call_id": request.id,
                "content": result_text(result),
            })
        }));
        messages
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
