use anyhow::Result;
use console::style;
use serde_json::Value;
use std::io::Write;

use crate::prompt::options::{describe_condition, describe_kind};
use threadchat::providers::ProviderRegistry;

/// Print every registered provider with the options it accepts.
pub fn list_providers(registry: &ProviderRegistry, out: &mut impl Write) -> Result<()> {
    for provider in registry.iter() {
        writeln!(out, "{}", style(provider.name()).bold())?;
        for spec in &provider.config_schema().options {
            let default = match &spec.default {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            write!(
                out,
                "  {}  {} (default {})",
                style(&spec.key).cyan(),
                describe_kind(&spec.kind),
                default
            )?;
            if let Some(condition) = &spec.visible_when {
                write!(out, ", {}", describe_condition(condition))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_providers() {
        let registry = ProviderRegistry::with_defaults().unwrap();
        let mut out = Vec::new();
        list_providers(&registry, &mut out).unwrap();
        let out = console::strip_ansi_codes(&String::from_utf8(out).unwrap()).to_string();

        assert!(out.starts_with("Anthropic Agent\n"));
        assert!(out.contains("OpenAI Agent\n"));
        assert!(out.contains(
            "  thinking_budget  500 to 10000, step 500 (default 2000), only when thinking_enabled = true"
        ));
        assert!(out.contains("  model  one of"));
    }
}
