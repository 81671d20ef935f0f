//! Classifies inbound payloads into bot commands or flow answers.

use crate::beta::Answer;
use crate::channels::Payload;

/// What the bot should do with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/help`: reply with the command list. The flow is not touched.
    Help,
    /// An answer for the sign-up flow (`/beta` and `/start` map to `Answer::Start`).
    Flow(Answer),
    /// A slash command the bot does not know. Ignored.
    Unknown(String),
}

/// Parses payloads into [`Command`]s.
pub struct CommandParser;

impl CommandParser {
    pub fn parse(payload: &Payload) -> Command {
        let text = match payload {
            Payload::Choice(value) => return Command::Flow(Answer::Choice(value.clone())),
            Payload::Text(text) => text,
        };

        let Some(command) = command_name(text) else {
            return Command::Flow(Answer::Text(text.clone()));
        };

        match command.as_str() {
            "help" => Command::Help,
            "beta" | "start" => Command::Flow(Answer::Start),
            _ => Command::Unknown(command),
        }
    }
}

/// `/beta@SomeBot extra` → `beta`. `None` when the text is not a command.
fn command_name(text: &str) -> Option<String> {
    let first = text.trim().split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }
    Some(name.to_ascii_lowercase())
}
