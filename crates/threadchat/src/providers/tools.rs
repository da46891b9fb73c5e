use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

use super::utils::send_request;

pub const WEB_SEARCH: &str = "web_search";
const DEFAULT_SEARCH_HOST: &str = "https://api.duckduckgo.com";
const MAX_SNIPPETS: usize = 5;
const NO_RESULTS: &str = "No good DuckDuckGo Search Result was found";

/// A tool call the model asked for in one round of a turn
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolRequest {
    /// A call whose arguments were streamed as JSON text.
    pub fn from_buffer(id: &str, name: &str, buffer: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: parse_arguments(buffer),
        }
    }
}

/// Streamed argument text as a value; an empty buffer means no arguments.
pub fn parse_arguments(buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(buffer).unwrap_or_else(|_| Value::String(buffer.to_string()))
}

/// The tool every built-in agent can call: a DuckDuckGo search. The endpoint is
/// `DUCKDUCKGO_HOST` unless set explicitly.
#[derive(Debug, Clone)]
pub struct WebSearch {
    client: Client,
    host: String,
}

impl WebSearch {
    pub fn new(client: Client, host: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
        }
    }

    pub fn from_env(client: Client) -> Self {
        let host =
            std::env::var("DUCKDUCKGO_HOST").unwrap_or_else(|_| DEFAULT_SEARCH_HOST.to_string());
        Self::new(client, host)
    }

    pub fn description() -> &'static str {
        "A wrapper around DuckDuckGo Search. Useful for when you need to answer questions \
         about current events. Input should be a search query."
    }

    pub fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "search query to look up"}
            },
            "required": ["query"],
        })
    }

    /// Run one requested call. Failures become the result text so the model can react to them.
    pub async fn dispatch(&self, request: &ToolRequest) -> Value {
        if request.name != WEB_SEARCH {
            return Value::String(format!("Unknown tool: {}", request.name));
        }
        let outcome = match request.arguments.get("query").and_then(Value::as_str) {
            Some(query) => self.search(query).await,
            None => Err(anyhow!("missing argument: query")),
        };
        match outcome {
            Ok(text) => Value::String(text),
            Err(e) => {
                tracing::warn!("Web search failed: {:#}", e);
                Value::String(format!("Search failed: {:#}", e))
            }
        }
    }

    async fn search(&self, query: &str) -> Result<String> {
        tracing::debug!("Searching the web for {:?}", query);
        let request = self.client.get(self.host.trim_end_matches('/')).query(&[
            ("q", query),
            ("format", "json"),
            ("no_html", "1"),
            ("skip_disambig", "1"),
        ]);
        let body = send_request(request)
            .await
            .context("DuckDuckGo request failed")?;
        Ok(snippets(&body))
    }
}

/// The abstract, the direct answer and related topic texts, one per line.
fn snippets(body: &Value) -> String {
    let mut lines: Vec<String> = ["Answer", "AbstractText", "Definition"]
        .iter()
        .filter_map(|key| body[*key].as_str())
        .filter(|text| !text.trim().is_empty())
        .map(String::from)
        .collect();

    let mut topics: Vec<&Value> = body["RelatedTopics"]
        .as_array()
        .map(|topics| topics.iter().collect())
        .unwrap_or_default();
    // Grouped topics nest their entries under "Topics".
    let mut index = 0;
    while index < topics.len() && lines.len() < MAX_SNIPPETS {
        let topic = topics[index];
        if let Some(nested) = topic["Topics"].as_array() {
            topics.extend(nested.iter());
        } else if let Some(text) = topic["Text"].as_str().filter(|t| !t.is_empty()) {
            lines.push(text.to_string());
        }
        index += 1;
    }

    if lines.is_empty() {
        NO_RESULTS.to_string()
    } else {
        lines.join("\n")
    }
}

/// A tool result as the text providers send back to the model.
pub fn result_text(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
