mod attachments;
mod commands;
mod configuration;
mod prompt;
mod render;
mod session;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use commands::chat::{handle_chat, ChatRequest};
use commands::providers::list_providers;
use commands::threads::{delete_thread, list_threads, new_thread, rename_thread, show_thread};
use configuration::Settings;
use render::{TerminalSink, Theme};
use threadchat::controller::ThreadController;
use threadchat::providers::registry;
use threadchat::providers::ProviderRegistry;
use threadchat::store::FileThreadStore;

#[derive(Parser)]
#[command(author, version, about = "Chat with LLM agents in persistent threads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Chat on a thread (default when no subcommand is given)
    Chat {
        /// Thread to continue; defaults to the most recently updated one
        #[arg(short, long, value_name = "ID", conflicts_with = "new")]
        thread: Option<String>,

        /// Start a new thread
        #[arg(short, long)]
        new: bool,

        /// Agent to chat with, see `threadchat providers`
        #[arg(short, long, value_name = "NAME")]
        provider: Option<String>,

        /// Agent option, may be repeated
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Pick agent options interactively before chatting
        #[arg(long)]
        configure: bool,

        /// Attach a jpg or png image to the first message, may be repeated
        #[arg(short, long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },
    /// Manage stored threads
    Threads {
        #[command(subcommand)]
        command: ThreadCommand,
    },
    /// List available agents and their options
    Providers,
}

#[derive(Subcommand)]
enum ThreadCommand {
    /// List threads, most recently updated first
    List,
    /// Print a thread's history
    Show { id: String },
    /// Delete a thread
    Delete { id: String },
    /// Set a thread's title
    Rename { id: String, title: String },
    /// Create an empty thread
    New,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    registry::install(ProviderRegistry::with_defaults()?)
        .map_err(|_| anyhow!("Provider registry already installed"))?;
    let registry = registry::global().ok_or_else(|| anyhow!("Provider registry missing"))?;

    let store = FileThreadStore::open(settings.store.dir.clone())
        .await
        .with_context(|| format!("Failed to open {}", settings.store.dir.display()))?;
    let controller = Arc::new(ThreadController::new(Arc::new(store)));

    let mut stdout = io::stdout();
    match cli.command {
        None => handle_chat(ChatRequest::default(), &settings, registry, controller).await,
        Some(Command::Chat {
            thread,
            new,
            provider,
            options,
            configure,
            images,
        }) => {
            let request = ChatRequest {
                thread,
                new,
                provider,
                options,
                configure,
                images,
            };
            handle_chat(request, &settings, registry, controller).await
        }
        Some(Command::Threads { command }) => match command {
            ThreadCommand::List => list_threads(&controller, None, &mut stdout).await,
            ThreadCommand::Show { id } => {
                let mut sink = TerminalSink::stdout(Theme::Dark);
                show_thread(&controller, &id, &mut sink).await
            }
            ThreadCommand::Delete { id } => delete_thread(&controller, &id, &mut stdout).await,
            ThreadCommand::Rename { id, title } => {
                rename_thread(&controller, &id, &title, &mut stdout).await
            }
            ThreadCommand::New => new_thread(&controller, &mut stdout).await,
        },
        Some(Command::Providers) => list_providers(registry, &mut stdout),
    }
}
