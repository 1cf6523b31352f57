//! Console commands read from stdin.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Quit,
    Help,
    /// Start a new conversation
    New,
    /// Switch to another conversation
    Open(String),
    /// Restart the current conversation
    Reload,
    /// Jump to the latest message
    Bottom,
    /// Anything else is sent as-is
    Submit(String),
    /// A slash command we don't know
    Unknown(String),
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return ConsoleInput::Submit(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        match name {
            "quit" | "exit" | "q" => ConsoleInput::Quit,
            "help" | "?" => ConsoleInput::Help,
            "new" => ConsoleInput::New,
            "open" if !arg.is_empty() => ConsoleInput::Open(arg.to_string()),
            "reload" | "retry" => ConsoleInput::Reload,
            "bottom" | "latest" => ConsoleInput::Bottom,
            _ => ConsoleInput::Unknown(trimmed.to_string()),
        }
    }
}

pub const HELP: &str = "\
Commands:
  /open <id>   switch to a conversation
  /new         start a new conversation
  /reload      reconnect and reload the current conversation
  /bottom      jump to the latest message
  /help        show this help
  /quit        leave
Anything else is sent to the operations backend.";
