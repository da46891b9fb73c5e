use bat::WrappingMode;
use console::style;
use serde_json::Value;
use std::io::{self, Stdout, Write};

use threadchat::models::event::DisplayEvent;
use threadchat::models::message::Message;
use threadchat::sink::{RenderSink, SinkError};

const MAX_STRING_LENGTH: usize = 40;
const INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    fn bat_theme(self) -> &'static str {
        match self {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Block {
    Text,
    Thinking,
    Tool,
}

/// Streams display events to a terminal as they arrive.
pub struct TerminalSink<W: Write + Send = Stdout> {
    out: W,
    theme: Theme,
    // Highlight tool results with bat; bat always writes to stdout.
    pretty: bool,
    block: Option<Block>,
}

impl TerminalSink<Stdout> {
    pub fn stdout(theme: Theme) -> Self {
        Self {
            out: io::stdout(),
            theme,
            pretty: true,
            block: None,
        }
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn plain(out: W) -> Self {
        Self {
            out,
            theme: Theme::Dark,
            pretty: false,
            block: None,
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// End a block left open by a turn that stopped without `TurnComplete`.
    pub fn interrupt(&mut self) -> io::Result<()> {
        if self.block.take().is_some() {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    fn enter(&mut self, block: Block) -> io::Result<()> {
        if self.block == Some(block) {
            return Ok(());
        }
        if self.block.is_some() {
            writeln!(self.out)?;
        }
        if block == Block::Thinking {
            writeln!(self.out, "{}", style("Thinking").dim().bold())?;
        }
        self.block = Some(block);
        Ok(())
    }

    fn tool_start(&mut self, name: &str, arguments: &Value) -> io::Result<()> {
        self.enter(Block::Tool)?;
        writeln!(
            self.out,
            "─── {} ──────────────────────────",
            style(name).magenta()
        )?;
        print_params(&mut self.out, arguments, 0)
    }

    fn tool_result(&mut self, result: &Value) -> io::Result<()> {
        self.enter(Block::Tool)?;
        let (content, language) = match result {
            Value::String(text) => (text.clone(), "Markdown"),
            other => (
                serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
                "JSON",
            ),
        };
        if self.pretty {
            self.out.flush()?;
            print_tool_result(&content, self.theme.bat_theme(), language)
        } else {
            writeln!(self.out, "{}", content)
        }
    }

    fn write_user_message(&mut self, message: &Message) -> io::Result<()> {
        writeln!(self.out, "{} {}", style(">").bold().cyan(), message.text())?;
        for (media_type, _) in message.images() {
            writeln!(self.out, "  {}", style(format!("[{} attached]", media_type)).dim())?;
        }
        self.out.flush()
    }

    fn write_event(&mut self, event: &DisplayEvent) -> io::Result<()> {
        match event {
            DisplayEvent::TextDelta { text } => {
                self.enter(Block::Text)?;
                write!(self.out, "{}", text)?;
            }
            DisplayEvent::ThinkingDelta { text } => {
                self.enter(Block::Thinking)?;
                write!(self.out, "{}", style(text).dim().italic())?;
            }
            DisplayEvent::ToolCallStart {
                name, arguments, ..
            } => self.tool_start(name, arguments)?,
            DisplayEvent::ToolCallResult { result, .. } => self.tool_result(result)?,
            DisplayEvent::TurnComplete => {
                self.block = None;
                writeln!(self.out)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }
}

impl<W: Write + Send> RenderSink for TerminalSink<W> {
    fn accept(&mut self, event: &DisplayEvent) -> Result<(), SinkError> {
        self.write_event(event).map_err(io_error)
    }

    /// Stored user inputs show as prompts, followed by a note per attached image.
    fn user_message(&mut self, message: &Message) -> Result<(), SinkError> {
        self.write_user_message(message).map_err(io_error)
    }
}

fn io_error(e: io::Error) -> SinkError {
    SinkError::new(format!("terminal write failed: {}", e))
}

fn print_tool_result(content: &str, theme: &str, language: &str) -> io::Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()).name("Tool Result:"))
        .theme(theme)
        .language(language)
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print()
        .map(|_| ())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Format parameters recursively with indentation and colors
fn print_params<W: Write>(out: &mut W, value: &Value, depth: usize) -> io::Result<()> {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        writeln!(out, "{}{}:", indent, style(key).dim())?;
                        print_params(out, val, depth + 1)?;
                    }
                    Value::Array(arr) => {
                        writeln!(out, "{}{}:", indent, style(key).dim())?;
                        for item in arr {
                            writeln!(out, "{}{}- ", indent, INDENT)?;
                            print_params(out, item, depth + 2)?;
                        }
                    }
                    Value::String(s) if s.len() > MAX_STRING_LENGTH => {
                        writeln!(out, "{}{}: {}", indent, style(key).dim(), style("...").dim())?;
                    }
                    Value::String(s) => {
                        writeln!(out, "{}{}: {}", indent, style(key).dim(), style(s).green())?;
                    }
                    Value::Number(n) => {
                        writeln!(out, "{}{}: {}", indent, style(key).dim(), style(n).blue())?;
                    }
                    Value::Bool(b) => {
                        writeln!(out, "{}{}: {}", indent, style(key).dim(), style(b).blue())?;
                    }
                    Value::Null => {
                        writeln!(out, "{}{}: {}", indent, style(key).dim(), style("null").dim())?;
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                writeln!(out, "{}{}.", indent, i + 1)?;
                print_params(out, item, depth + 1)?;
            }
        }
        Value::String(s) if s.len() > MAX_STRING_LENGTH => {
            writeln!(
                out,
                "{}{}",
                indent,
                style(format!("[REDACTED: {} chars]", s.len())).yellow()
            )?;
        }
        Value::String(s) => writeln!(out, "{}{}", indent, style(s).green())?,
        Value::Number(n) => writeln!(out, "{}{}", indent, style(n).yellow())?,
        Value::Bool(b) => writeln!(out, "{}{}", indent, style(b).yellow())?,
        Value::Null => writeln!(out, "{}{}", indent, style("null").dim())?,
    }
    Ok(())
}
