pub mod anthropic;
pub mod base;
pub mod openai;
pub mod registry;
pub mod scripted;
pub mod tool_loop;
pub mod tools;
pub mod utils;

pub use base::{AgentProvider, ConfigSchema, OptionKind, OptionSpec, ProviderOptions};
pub use registry::ProviderRegistry;
