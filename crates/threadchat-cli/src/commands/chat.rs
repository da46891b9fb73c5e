use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::attachments::Attachment;
use crate::configuration::Settings;
use crate::prompt::options::{configure_interactively, parse_overrides};
use crate::session::ChatSession;
use threadchat::controller::ThreadController;
use threadchat::models::thread::Thread;
use threadchat::providers::{AgentProvider, ProviderOptions, ProviderRegistry};

#[derive(Debug, Default)]
pub struct ChatRequest {
    pub thread: Option<String>,
    pub new: bool,
    pub provider: Option<String>,
    pub options: Vec<String>,
    pub configure: bool,
    pub images: Vec<PathBuf>,
}

pub async fn handle_chat(
    request: ChatRequest,
    settings: &Settings,
    registry: &ProviderRegistry,
    controller: Arc<ThreadController>,
) -> Result<()> {
    let provider_name = request
        .provider
        .as_deref()
        .unwrap_or(&settings.agent.provider);
    let provider = registry.get(provider_name).with_context(|| {
        format!("Available providers: {}", registry.names().join(", "))
    })?;

    let options = chat_options(provider.as_ref(), &request, settings)?;
    let attachments = request
        .images
        .iter()
        .map(Attachment::load)
        .collect::<Result<Vec<_>>>()?;
    let thread = choose_thread(&controller, &request).await?;

    let mut session = ChatSession::new(controller, provider, options, thread)?;
    session.attach(attachments);
    session.start().await
}

/// Settings first (only when they were written for this provider), then `--option` pairs,
/// then the interactive form.
fn chat_options(
    provider: &dyn AgentProvider,
    request: &ChatRequest,
    settings: &Settings,
) -> Result<ProviderOptions> {
    let schema = provider.config_schema();

    let mut overrides = ProviderOptions::new();
    if settings.agent.provider == provider.name() {
        for (key, value) in &settings.agent.options {
            // Values from environment variables arrive as strings.
            let value = match (value.as_str(), schema.get(key)) {
                (Some(raw), Some(spec)) => spec.parse(raw)?,
                _ => value.clone(),
            };
            overrides.insert(key.clone(), value);
        }
    }
    overrides.extend(parse_overrides(&schema, &request.options)?);

    if request.configure {
        let initial = schema.resolve(&overrides)?;
        return configure_interactively(provider.name(), &schema, &initial);
    }
    Ok(schema.resolve(&overrides)?)
}

async fn choose_thread(controller: &ThreadController, request: &ChatRequest) -> Result<Thread> {
    if request.new {
        return Ok(controller.create_thread().await?);
    }
    if let Some(id) = &request.thread {
        return Ok(controller.select_thread(id).await?);
    }
    latest_or_new(controller).await
}

/// The most recently updated thread, or a fresh one when none is stored.
pub async fn latest_or_new(controller: &ThreadController) -> Result<Thread> {
    match controller.list_threads().await?.first() {
        Some(latest) => Ok(controller.select_thread(&latest.id).await?),
        None => Ok(controller.create_thread().await?),
    }
}
