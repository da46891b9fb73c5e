use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex};

use super::base::{AgentProvider, ConfigSchema, ProviderOptions};
use crate::agent::StreamingAgent;
use crate::models::event::RawEvent;
use crate::store::CheckpointHandle;

/// A provider whose agents replay pre-configured raw events, one script per invocation.
pub struct ScriptedProvider {
    name: String,
    scripts: Arc<Mutex<Vec<Vec<RawEvent>>>>,
}

impl ScriptedProvider {
    /// Every invocation replays `script`.
    pub fn new(name: &str, script: Vec<RawEvent>) -> Self {
        Self::with_scripts(name, vec![script])
    }

    /// Invocations consume `scripts` in order; the last one is repeated once the rest are used.
    pub fn with_scripts(name: &str, scripts: Vec<Vec<RawEvent>>) -> Self {
        Self {
            name: name.to_string(),
            scripts: Arc::new(Mutex::new(scripts)),
        }
    }
}

impl AgentProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    fn build(
        &self,
        checkpoint: CheckpointHandle,
        _options: &ProviderOptions,
    ) -> Result<Box<dyn StreamingAgent>> {
        Ok(Box::new(ScriptedAgent {
            checkpoint,
            scripts: self.scripts.clone(),
        }))
    }
}

pub struct ScriptedAgent {
    checkpoint: CheckpointHandle,
    scripts: Arc<Mutex<Vec<Vec<RawEvent>>>>,
}

impl ScriptedAgent {
    fn next_script(&self) -> Vec<RawEvent> {
        let mut scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(poisoned) => poisoned.into_inner(),
        };
        if scripts.len() > 1 {
            scripts.remove(0)
        } else {
            scripts.first().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl StreamingAgent for ScriptedAgent {
    async fn invoke(
        &self,
        thread_id: &str,
        _input: &str,
    ) -> Result<BoxStream<'_, Result<RawEvent>>> {
        if thread_id != self.checkpoint.thread_id() {
            bail!(
                "agent is bound to thread {}, not {}",
                self.checkpoint.thread_id(),
                thread_id
            );
        }
        let events = self.next_script();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}
