mod config;
mod chat;

pub use config::*;
pub use chat::*;

use tokio::io::{AsyncBufRead, Lines};

/// Next line of input, or `None` at end of input. A read error also ends
/// input but is logged first.
pub async fn next_input<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Option<String> {
    match lines.next_line().await {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read input");
            None
        }
    }
}

/// A line of user input, as understood by the terminal front-end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    History,
    Stats,
    Health,
    Focus,
    Config,
    SetBaseUrl(String),
    Help,
    Quit,
}

impl Command {
    /// Lines starting with `/` are commands; anything else is a message.
    /// Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        Some(match name {
            "history" => Command::History,
            "stats" => Command::Stats,
            "health" => Command::Health,
            "focus" => Command::Focus,
            "config" => Command::Config,
            "base-url" if !arg.is_empty() => Command::SetBaseUrl(arg.to_string()),
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        })
    }
}

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /history          show the conversation
  /stats            show today's quota
  /health           check the API
  /focus            simulate the window regaining focus
  /config           show the effective configuration
  /base-url <url>   save a new API base URL
  /quit             exit";
