use std::sync::{Arc, OnceLock};

use super::anthropic::AnthropicProvider;
use super::base::AgentProvider;
use super::openai::OpenAiProvider;
use crate::errors::{ChatError, ChatResult};

/// Providers by name, in registration order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AgentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The agents available out of the box.
    pub fn with_defaults() -> ChatResult<Self> {
        let mut registry = Self::new();
        registry.register(AnthropicProvider::default())?;
        registry.register(OpenAiProvider::default())?;
        Ok(registry)
    }

    pub fn register(&mut self, provider: impl AgentProvider + 'static) -> ChatResult<()> {
        if self.providers.iter().any(|p| p.name() == provider.name()) {
            return Err(ChatError::DuplicateProvider(provider.name().to_string()));
        }
        tracing::debug!("Registered provider {}", provider.name());
        self.providers.push(Arc::new(provider));
        Ok(())
    }

    pub fn get(&self, name: &str) -> ChatResult<Arc<dyn AgentProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| ChatError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn AgentProvider>> {
        self.providers.iter()
    }
}

static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();

/// Install the process-wide registry, read back through [`global`]. Only the first call
/// succeeds; later calls hand the rejected registry back.
pub fn install(registry: ProviderRegistry) -> Result<(), ProviderRegistry> {
    GLOBAL.set(registry)
}

/// The process-wide registry, once installed.
pub fn global() -> Option<&'static ProviderRegistry> {
    GLOBAL.get()
}
