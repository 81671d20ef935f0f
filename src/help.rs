//! `/help` response.

use crate::beta::Prompt;

/// The command list shown for `/help`.
pub const HELP_TEXT: &str = "Here are the available commands:

/beta - Participate in the beta testing of the bot
/start - Same as /beta
/help - Get a list of available commands";

pub fn help_prompt() -> Prompt {
    Prompt::text(HELP_TEXT)
}
