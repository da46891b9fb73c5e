use anyhow::{anyhow, Result};
use serde_json::Value;

use threadchat::providers::base::{Condition, ConfigSchema, OptionKind, OptionSpec, ProviderOptions};

/// Parse `KEY=VALUE` pairs against a provider schema.
pub fn parse_overrides(schema: &ConfigSchema, pairs: &[String]) -> Result<ProviderOptions> {
    let mut overrides = ProviderOptions::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", pair))?;
        let key = key.trim();
        let spec = schema.get(key).ok_or_else(|| {
            anyhow!(
                "Unknown option '{}'. Known options: {}",
                key,
                schema
                    .options
                    .iter()
                    .map(|spec| spec.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        overrides.insert(key.to_string(), spec.parse(raw)?);
    }
    Ok(overrides)
}

/// Walk through the visible options of a schema with interactive prompts. `initial` values
/// are offered as defaults.
pub fn configure_interactively(
    provider_name: &str,
    schema: &ConfigSchema,
    initial: &ProviderOptions,
) -> Result<ProviderOptions> {
    cliclack::intro(format!(" {} ", provider_name))?;

    let mut chosen = ProviderOptions::new();
    for spec in &schema.options {
        if !ConfigSchema::is_visible(spec, &chosen) {
            continue;
        }
        let current = initial.get(&spec.key).unwrap_or(&spec.default);
        let value = prompt_for(spec, current)?;
        chosen.insert(spec.key.clone(), value);
    }

    let resolved = schema.resolve(&chosen)?;
    cliclack::outro("Options set for this chat")?;
    Ok(resolved)
}

fn prompt_for(spec: &OptionSpec, current: &Value) -> Result<Value> {
    let label = match &spec.help {
        Some(help) => format!("{} ({})", spec.label, help),
        None => spec.label.clone(),
    };

    match &spec.kind {
        OptionKind::Choice { choices } => {
            let items: Vec<(String, String, String)> = choices
                .iter()
                .map(|choice| (choice.clone(), choice.clone(), String::new()))
                .collect();
            let initial = current.as_str().unwrap_or_default().to_string();
            let choice: String = cliclack::select(label)
                .items(&items)
                .initial_value(initial)
                .interact()?;
            Ok(Value::from(choice))
        }
        OptionKind::Toggle => {
            let enabled = cliclack::confirm(label)
                .initial_value(current.as_bool().unwrap_or(false))
                .interact()?;
            Ok(Value::Bool(enabled))
        }
        OptionKind::Float { .. } | OptionKind::Integer { .. } => loop {
            let raw: String = cliclack::input(format!("{} [{}]", label, describe_kind(&spec.kind)))
                .default_input(&current.to_string())
                .interact()?;
            match spec.parse(&raw) {
                Ok(value) => break Ok(value),
                Err(e) => cliclack::log::error(e.to_string())?,
            }
        },
    }
}

pub fn describe_kind(kind: &OptionKind) -> String {
    match kind {
        OptionKind::Choice { choices } => format!("one of {}", choices.join(", ")),
        OptionKind::Float { min, max, step } => format!("{} to {}, step {}", min, max, step),
        OptionKind::Integer { min, max, step } => format!("{} to {}, step {}", min, max, step),
        OptionKind::Toggle => "true or false".to_string(),
    }
}

pub fn describe_condition(condition: &Condition) -> String {
    match condition {
        Condition::Equals { key, value } => format!("only when {} = {}", key, value),
        Condition::NotOneOf { key, values } => format!(
            "not when {} is {}",
            key,
            values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" or ")
        ),
    }
}
