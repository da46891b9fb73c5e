use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m> \x1b[0m";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Send to the agent
    Message(String),
    Rename(String),
    NewThread,
    ListThreads,
    /// Continue another thread
    Switch(String),
    /// Delete the current thread
    DeleteThread,
    /// Attach an image to the next message
    Image(String),
    ToggleTheme,
    Help,
    /// Nothing to do, ask again
    AskAgain,
    Exit,
}

pub struct InputReader {
    editor: DefaultEditor,
}

impl InputReader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }

    pub fn read(&mut self) -> Result<Input> {
        match self.editor.readline(PROMPT) {
            Ok(line) => {
                let input = parse_input(&line);
                if let Input::Message(text) = &input {
                    let _ = self.editor.add_history_entry(text.as_str());
                }
                Ok(input)
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(Input::Exit),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn parse_input(line: &str) -> Input {
    let text = line.trim();
    if text.is_empty() {
        return Input::AskAgain;
    }

    let (command, rest) = match text.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (text, ""),
    };
    match command.to_ascii_lowercase().as_str() {
        "/exit" | "/quit" => Input::Exit,
        "/new" => Input::NewThread,
        "/threads" => Input::ListThreads,
        "/delete" => Input::DeleteThread,
        "/switch" | "/image" if rest.is_empty() => Input::Help,
        "/switch" => Input::Switch(rest.to_string()),
        "/image" => Input::Image(rest.to_string()),
        "/t" => Input::ToggleTheme,
        "/?" | "/help" => Input::Help,
        "/rename" if rest.is_empty() => Input::Help,
        "/rename" => Input::Rename(rest.to_string()),
        _ => Input::Message(text.to_string()),
    }
}

pub fn print_help() {
    println!("Commands:");
    println!("/exit - Exit the chat");
    println!("/new - Start a new thread");
    println!("/threads - List threads, the current one marked with *");
    println!("/switch <id> - Continue another thread");
    println!("/delete - Delete the current thread");
    println!("/image <path> - Attach a jpg or png image to the next message");
    println!("/rename <title> - Rename the current thread");
    println!("/t - Toggle Light/Dark theme");
    println!("/? | /help - Display this help message");
    println!("Ctrl+C - Cancel the running reply (nothing from it is saved)");
}
