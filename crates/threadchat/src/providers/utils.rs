use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, EventSource};
use serde_json::{json, Value};

use super::base::OptionSpec;
use crate::models::message::{Message, MessagePart, Role};

pub fn http_client() -> Result<Client> {
    // Streams stay open for as long as the model keeps producing, so only connecting is bounded.
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// The "Enable Streaming" option every built-in agent carries. Off, a round is requested as
/// one complete response.
pub fn streaming_option() -> OptionSpec {
    OptionSpec::toggle("streaming", "Enable Streaming", true)
        .with_help("Stream responses as they are produced (disable for non-streaming models)")
}

/// Start an event stream and wait for the server to accept it. Failed requests are not
/// retried.
pub async fn open_event_source(request: RequestBuilder) -> Result<EventSource> {
    let mut source = EventSource::new(request).context("Request cannot be streamed")?;
    source.set_retry_policy(Box::new(Never));

    match source.next().await {
        Some(Ok(Event::Open)) => Ok(source),
        Some(Ok(Event::Message(message))) => {
            source.close();
            Err(anyhow!("Event stream sent data before opening: {}", message.data))
        }
        Some(Err(e)) => {
            source.close();
            Err(stream_error(e).await)
        }
        None => Err(anyhow!("Event stream closed before opening")),
    }
}

/// Describe a failed event stream, with the response body when the server sent one.
pub async fn stream_error(error: reqwest_eventsource::Error) -> anyhow::Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            status_error(status, response).await
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, response) => {
            let body = response.text().await.unwrap_or_default();
            anyhow!(
                "Expected an event stream, got {:?}: {}",
                content_type,
                body
            )
        }
        other => anyhow!("Stream error: {}", other),
    }
}

/// Send a request expecting one JSON response.
pub async fn send_request(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await.context("HTTP request failed")?;
    match response.status() {
        StatusCode::OK => Ok(response.json().await.context("Invalid JSON response")?),
        status => Err(status_error(status, response).await),
    }
}

async fn status_error(status: StatusCode, response: Response) -> anyhow::Error {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 {
        return anyhow!("Server error: {}", status);
    }
    let error_text = response.text().await.unwrap_or_default();
    anyhow!("Request failed: {} - {}", status, error_text)
}

/// Committed history plus the new user message as `{role, content}` chat messages.
///
/// Thinking and tool traces stay local. Content is a plain string unless the message carries
/// images, in which case it is a list of parts with images in the shape `image` builds.
pub fn chat_messages(
    history: &[Message],
    input: &Message,
    image: impl Fn(&str, &str) -> Value,
) -> Vec<Value> {
    history
        .iter()
        .chain(std::iter::once(input))
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let text = message.text();
            if message.images().is_empty() {
                if text.trim().is_empty() {
                    return None;
                }
                return Some(json!({ "role": role, "content": text }));
            }

            let content: Vec<Value> = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::Text { content } => Some(json!({"type": "text", "text": content})),
                    MessagePart::Image { media_type, data } => {
                        Some(image(media_type.as_str(), data.as_str()))
                    }
                    _ => None,
                })
                .collect();
            Some(json!({ "role": role, "content": content }))
        })
        .collect()
}
