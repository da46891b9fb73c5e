use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use threadchat::providers::anthropic::ANTHROPIC_AGENT;

const ENV_PREFIX: &str = "THREADCHAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration, set {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted configuration key.
pub fn to_env_var(field: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        field.to_uppercase().replace('.', "__")
    )
}

#[derive(Debug, Deserialize)]
pub struct StoreSettings {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Option overrides for `provider`
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            options: Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Settings {
    /// Defaults, then `$CONFIG_DIR/threadchat/config.toml` if present, then `THREADCHAT_*`
    /// environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let config_file = dirs::config_dir().map(|dir| dir.join("threadchat").join("config.toml"));
        Self::load(config_file.as_deref())
    }

    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("agent.provider", default_provider())?
            .set_default("log_level", default_log_level())?;
        if let Some(dir) = default_store_dir() {
            builder = builder.set_default("store.dir", dir.to_string_lossy().to_string())?;
        }
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&missing_key(field)),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

// serde reports the innermost field name only.
fn missing_key(field: &str) -> String {
    match field {
        "dir" => "store.dir".to_string(),
        other => other.to_string(),
    }
}

fn default_store_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("threadchat").join("threads"))
}

fn default_provider() -> String {
    ANTHROPIC_AGENT.to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("THREADCHAT_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("THREADCHAT_STORE__DIR", "/tmp/threadchat-test");

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.store.dir, PathBuf::from("/tmp/threadchat-test"));
        assert_eq!(settings.agent.provider, "Anthropic Agent");
        assert!(settings.agent.options.is_empty());
        assert_eq!(settings.log_level, "warn");

        env::remove_var("THREADCHAT_STORE__DIR");
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("THREADCHAT_STORE__DIR", "/tmp/elsewhere");
        env::set_var("THREADCHAT_AGENT__PROVIDER", "OpenAI Agent");
        env::set_var("THREADCHAT_AGENT__OPTIONS__MAX_TOKENS", "2048");
        env::set_var("THREADCHAT_LOG_LEVEL", "debug");

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.store.dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(settings.agent.provider, "OpenAI Agent");
        assert_eq!(settings.agent.options.get("max_tokens"), Some(&json!(2048)));
        assert_eq!(settings.log_level, "debug");

        clean_env();
    }

    #[test]
    #[serial]
    fn test_config_file_then_environment() {
        clean_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "log_level = \"info\"\n[store]\ndir = \"/srv/threads\"\n[agent]\nprovider = \"OpenAI Agent\"\n[agent.options]\nmodel = \"gpt-4o-mini\""
        )
        .unwrap();
        env::set_var("THREADCHAT_LOG_LEVEL", "trace");

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.store.dir, PathBuf::from("/srv/threads"));
        assert_eq!(settings.agent.provider, "OpenAI Agent");
        assert_eq!(settings.agent.options.get("model"), Some(&json!("gpt-4o-mini")));
        assert_eq!(settings.log_level, "trace");

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_config_file_is_fine() {
        clean_env();
        env::set_var("THREADCHAT_STORE__DIR", "/tmp/threadchat-test");
        let settings = Settings::load(Some(Path::new("/nonexistent/threadchat.toml")));
        assert!(settings.is_ok());
        clean_env();
    }

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("store.dir"), "THREADCHAT_STORE__DIR");
        assert_eq!(to_env_var("log_level"), "THREADCHAT_LOG_LEVEL");
    }
}
