use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::StreamingAgent;
use crate::errors::{ChatError, ChatResult};
use crate::store::CheckpointHandle;

/// Option values keyed by option key, as handed to [`AgentProvider::build`].
pub type ProviderOptions = Map<String, Value>;

/// A named factory for streaming agents, plus the schema of the options it accepts.
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &str;

    fn config_schema(&self) -> ConfigSchema;

    /// Build an agent bound to one thread's checkpoint. `options` should come from
    /// [`ConfigSchema::resolve`].
    fn build(
        &self,
        checkpoint: CheckpointHandle,
        options: &ProviderOptions,
    ) -> Result<Box<dyn StreamingAgent>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionKind {
    Choice { choices: Vec<String> },
    Float { min: f64, max: f64, step: f64 },
    Integer { min: i64, max: i64, step: i64 },
    Toggle,
}

/// Visibility rule for an option, evaluated against the options declared before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Condition {
    Equals { key: String, value: Value },
    NotOneOf { key: String, values: Vec<Value> },
}

impl Condition {
    pub fn holds(&self, resolved: &ProviderOptions) -> bool {
        match self {
            Condition::Equals { key, value } => resolved.get(key) == Some(value),
            Condition::NotOneOf { key, values } => resolved
                .get(key)
                .map_or(true, |current| !values.contains(current)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub kind: OptionKind,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Condition>,
}

impl OptionSpec {
    pub fn choice(key: &str, label: &str, choices: &[&str], default: &str) -> Self {
        Self::new(
            key,
            label,
            OptionKind::Choice {
                choices: choices.iter().map(|c| c.to_string()).collect(),
            },
            Value::from(default),
        )
    }

    pub fn float(key: &str, label: &str, min: f64, max: f64, step: f64, default: f64) -> Self {
        Self::new(
            key,
            label,
            OptionKind::Float { min, max, step },
            Value::from(default),
        )
    }

    pub fn integer(key: &str, label: &str, min: i64, max: i64, step: i64, default: i64) -> Self {
        Self::new(
            key,
            label,
            OptionKind::Integer { min, max, step },
            Value::from(default),
        )
    }

    pub fn toggle(key: &str, label: &str, default: bool) -> Self {
        Self::new(key, label, OptionKind::Toggle, Value::from(default))
    }

    fn new(key: &str, label: &str, kind: OptionKind, default: Value) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            help: None,
            kind,
            default,
            visible_when: None,
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn visible_when(mut self, condition: Condition) -> Self {
        self.visible_when = Some(condition);
        self
    }

    /// Parse a value typed by a user (command line, prompt) according to this option's kind.
    pub fn parse(&self, raw: &str) -> ChatResult<Value> {
        let raw = raw.trim();
        let value = match &self.kind {
            OptionKind::Choice { .. } => Value::from(raw),
            OptionKind::Float { .. } => raw
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| self.invalid(format!("'{}' is not a number", raw)))?,
            OptionKind::Integer { .. } => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| self.invalid(format!("'{}' is not an integer", raw)))?,
            OptionKind::Toggle => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Value::Bool(true),
                "false" | "no" | "off" | "0" => Value::Bool(false),
                _ => return Err(self.invalid(format!("'{}' is not a boolean", raw))),
            },
        };
        self.validate(&value)?;
        Ok(value)
    }

    pub fn validate(&self, value: &Value) -> ChatResult<()> {
        match &self.kind {
            OptionKind::Choice { choices } => match value.as_str() {
                Some(choice) if choices.iter().any(|c| c == choice) => Ok(()),
                _ => Err(self.invalid(format!("must be one of {}", choices.join(", ")))),
            },
            OptionKind::Float { min, max, .. } => match value.as_f64() {
                Some(v) if v >= *min && v <= *max => Ok(()),
                _ => Err(self.invalid(format!("must be a number between {} and {}", min, max))),
            },
            OptionKind::Integer { min, max, .. } => match value.as_i64() {
                Some(v) if v >= *min && v <= *max => Ok(()),
                _ => Err(self.invalid(format!("must be an integer between {} and {}", min, max))),
            },
            OptionKind::Toggle => match value {
                Value::Bool(_) => Ok(()),
                _ => Err(self.invalid("must be true or false".to_string())),
            },
        }
    }

    fn invalid(&self, reason: String) -> ChatError {
        ChatError::InvalidOption {
            key: self.key.clone(),
            reason,
        }
    }
}

/// Ordered option declarations of one provider. Pure metadata: rendering is left to the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub options: Vec<OptionSpec>,
}

impl ConfigSchema {
    pub fn new(options: Vec<OptionSpec>) -> Self {
        Self { options }
    }

    pub fn get(&self, key: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|spec| spec.key == key)
    }

    /// Whether `spec` should be shown given the values resolved so far.
    pub fn is_visible(spec: &OptionSpec, resolved: &ProviderOptions) -> bool {
        spec.visible_when
            .as_ref()
            .map_or(true, |condition| condition.holds(resolved))
    }

    /// Fill in defaults for missing keys, validate overrides and drop hidden options.
    ///
    /// Unknown keys are rejected. An override for an option that ends up hidden is ignored.
    pub fn resolve(&self, overrides: &ProviderOptions) -> ChatResult<ProviderOptions> {
        if let Some(unknown) = overrides.keys().find(|key| self.get(key).is_none()) {
            return Err(ChatError::InvalidOption {
                key: unknown.clone(),
                reason: "unknown option".to_string(),
            });
        }

        let mut resolved = ProviderOptions::new();
        for spec in &self.options {
            if !Self::is_visible(spec, &resolved) {
                continue;
            }
            let value = overrides
                .get(&spec.key)
                .cloned()
                .unwrap_or_else(|| spec.default.clone());
            spec.validate(&value)?;
            resolved.insert(spec.key.clone(), value);
        }
        Ok(resolved)
    }
}
