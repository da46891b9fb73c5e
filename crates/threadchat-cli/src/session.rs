use anyhow::{Context, Result};
use console::style;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;

use crate::attachments::{user_message, Attachment};
use crate::commands::chat::latest_or_new;
use crate::commands::threads::list_threads;
use crate::prompt::input::{print_help, Input, InputReader};
use crate::render::{TerminalSink, Theme};
use threadchat::agent::StreamingAgent;
use threadchat::controller::ThreadController;
use threadchat::models::thread::Thread;
use threadchat::providers::{AgentProvider, ProviderOptions};
use threadchat::sink::{RenderSink, Transcript};

/// An interactive chat on one thread at a time.
pub struct ChatSession {
    controller: Arc<ThreadController>,
    provider: Arc<dyn AgentProvider>,
    options: ProviderOptions,
    thread: Thread,
    agent: Box<dyn StreamingAgent>,
    sink: TerminalSink,
    reader: InputReader,
    // Images waiting for the next message
    attachments: Vec<Attachment>,
}

impl ChatSession {
    pub fn new(
        controller: Arc<ThreadController>,
        provider: Arc<dyn AgentProvider>,
        options: ProviderOptions,
        thread: Thread,
    ) -> Result<Self> {
        let agent = provider
            .build(thread.checkpoint.clone(), &options)
            .with_context(|| format!("Failed to start {}", provider.name()))?;
        Ok(Self {
            controller,
            provider,
            options,
            thread,
            agent,
            sink: TerminalSink::stdout(Theme::Dark),
            reader: InputReader::new()?,
            attachments: Vec::new(),
        })
    }

    pub fn attach(&mut self, attachments: Vec<Attachment>) {
        self.attachments.extend(attachments);
    }

    /// Off, replies are collected behind a spinner and shown once complete.
    fn streaming(&self) -> bool {
        self.options
            .get("streaming")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub async fn start(&mut self) -> Result<()> {
        self.open_thread()?;

        loop {
            match self.reader.read()? {
                Input::Message(text) => self.run_turn(&text).await,
                Input::Rename(title) => {
                    match self.controller.rename_thread(&self.thread.id, &title).await {
                        Ok(summary) => {
                            self.thread.title = summary.title;
                            println!("{}", style(format!("Renamed to {}", self.thread.title)).dim());
                        }
                        Err(e) => eprintln!("{}", style(e).red()),
                    }
                }
                Input::NewThread => {
                    let thread = self.controller.create_thread().await?;
                    self.switch_to(thread)?;
                }
                Input::ListThreads => {
                    list_threads(&self.controller, Some(&self.thread.id), &mut io::stdout())
                        .await?;
                }
                Input::Switch(id) => match self.controller.select_thread(&id).await {
                    Ok(thread) => self.switch_to(thread)?,
                    Err(e) => eprintln!("{}", style(e).red()),
                },
                Input::DeleteThread => self.delete_thread().await?,
                Input::Image(path) => match Attachment::load(&path) {
                    Ok(image) => {
                        self.attachments.push(image);
                        println!(
                            "{}",
                            style(format!(
                                "Attached {} ({} for the next message)",
                                path,
                                self.attachments.len()
                            ))
                            .dim()
                        );
                    }
                    Err(e) => eprintln!("{}", style(format!("{:#}", e)).red()),
                },
                Input::ToggleTheme => {
                    let theme = self.sink.theme().toggled();
                    self.sink.set_theme(theme);
                    println!("{}", style(format!("Theme set to {:?}", theme)).dim());
                }
                Input::Help => print_help(),
                Input::AskAgain => continue,
                Input::Exit => break,
            }
        }

        println!(
            "{}",
            style(format!("Closing thread {}", self.thread.id)).dim()
        );
        Ok(())
    }

    fn switch_to(&mut self, thread: Thread) -> Result<()> {
        // Agents are bound to one thread's checkpoint.
        self.agent = self
            .provider
            .build(thread.checkpoint.clone(), &self.options)
            .with_context(|| format!("Failed to start {}", self.provider.name()))?;
        self.thread = thread;
        self.open_thread()
    }

    async fn delete_thread(&mut self) -> Result<()> {
        let id = self.thread.id.clone();
        if let Err(e) = self.controller.delete_thread(&id).await {
            eprintln!("{}", style(e).red());
            return Ok(());
        }
        println!("{}", style(format!("Deleted thread {}", id)).dim());
        let next = latest_or_new(&self.controller).await?;
        self.switch_to(next)
    }

    fn open_thread(&mut self) -> Result<()> {
        println!(
            "{} {} {}",
            style(&self.thread.title).bold(),
            style(&self.thread.id).dim(),
            style(format!("with {}", self.provider.name())).dim()
        );
        println!("{}", style("Type /help for commands").dim());
        self.controller
            .replay(&self.thread, &mut self.sink)
            .context("Failed to render thread history")?;
        for image in &self.attachments {
            println!(
                "{}",
                style(format!("{} is attached to the next message", image.path.display())).dim()
            );
        }
        Ok(())
    }

    async fn run_turn(&mut self, input: &str) {
        let message = user_message(input, &self.attachments);
        let streaming = self.streaming();
        let mut transcript = Transcript::new();
        let spinner = cliclack::spinner();
        if !streaming {
            spinner.start("Processing...");
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let result = {
            let sink: &mut dyn RenderSink = if streaming {
                &mut self.sink
            } else {
                &mut transcript
            };
            let turn = self.controller.submit_message(
                &self.thread.id,
                message.clone(),
                self.agent.as_ref(),
                sink,
                cancel_rx,
            );
            tokio::pin!(turn);

            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    _ = tokio::signal::ctrl_c() => {
                        let _ = cancel_tx.send(true);
                    }
                }
            }
        };
        if !streaming {
            spinner.stop("");
            for event in &transcript.events {
                if let Err(e) = self.sink.accept(event) {
                    eprintln!("{}", style(e).red());
                    break;
                }
            }
        }

        match result {
            Ok(outcome) => {
                self.thread.title = outcome.thread.title;
                self.thread.updated_at = outcome.thread.updated_at;
                self.thread.messages.push(message);
                self.thread.messages.push(outcome.message);
                self.attachments.clear();
                if outcome.unsupported_events > 0 {
                    println!(
                        "{}",
                        style(format!(
                            "({} events from the agent could not be shown)",
                            outcome.unsupported_events
                        ))
                        .dim()
                    );
                }
            }
            Err(e) => {
                let _ = self.sink.interrupt();
                if e.is_cancelled() {
                    println!(
                        "{}",
                        style("Interrupted. Nothing from this reply was saved.").yellow()
                    );
                } else {
                    eprintln!("{}", style(format!("Error: {}", e.source)).red());
                }
            }
        }
    }
}
