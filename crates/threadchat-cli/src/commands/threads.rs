use anyhow::Result;
use console::style;
use std::io::Write;

use crate::render::TerminalSink;
use threadchat::controller::ThreadController;
use threadchat::models::thread::ThreadSummary;

/// Print every thread, most recently updated first. `current` is marked with `*`.
pub async fn list_threads(
    controller: &ThreadController,
    current: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let threads = controller.list_threads().await?;
    if threads.is_empty() {
        writeln!(out, "{}", style("No threads yet").dim())?;
    }
    for thread in &threads {
        match current {
            Some(id) if id == thread.id => writeln!(out, "* {}", summary_line(thread))?,
            Some(_) => writeln!(out, "  {}", summary_line(thread))?,
            None => writeln!(out, "{}", summary_line(thread))?,
        }
    }
    Ok(())
}

pub async fn show_thread<W: Write + Send>(
    controller: &ThreadController,
    id: &str,
    sink: &mut TerminalSink<W>,
) -> Result<()> {
    let thread = controller.select_thread(id).await?;
    controller.replay(&thread, sink)?;
    Ok(())
}

pub async fn new_thread(controller: &ThreadController, out: &mut impl Write) -> Result<()> {
    let thread = controller.create_thread().await?;
    writeln!(out, "{}", summary_line(&thread.summary()))?;
    Ok(())
}

pub async fn rename_thread(
    controller: &ThreadController,
    id: &str,
    title: &str,
    out: &mut impl Write,
) -> Result<()> {
    let summary = controller.rename_thread(id, title).await?;
    writeln!(out, "{}", summary_line(&summary))?;
    Ok(())
}

pub async fn delete_thread(
    controller: &ThreadController,
    id: &str,
    out: &mut impl Write,
) -> Result<()> {
    controller.delete_thread(id).await?;
    writeln!(out, "Deleted {}", id)?;
    Ok(())
}

fn summary_line(thread: &ThreadSummary) -> String {
    format!(
        "{}  {}  {}",
        style(&thread.id).dim(),
        style(thread.updated_at.format("%Y-%m-%d %H:%M")).dim(),
        thread.title
    )
}
