//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Each line is a typed message. A line starting with `!` is a button tap:
//! `!yes` taps the button whose value is `yes`.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse, Payload};
use crate::error::ChannelError;

/// User and chat id of the local user.
pub const CLI_USER_ID: i64 = 1;

const CLI_USER_NAME: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
#[derive(Debug, Default)]
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Payload> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix('!') {
        Some(value) if !value.trim().is_empty() => Some(Payload::Choice(value.trim().to_string())),
        Some(_) => None,
        None => Some(Payload::Text(line.to_string())),
    }
}

/// Render a response for the terminal, buttons as `[Label → !value]`.
pub fn format_response(response: &OutgoingResponse) -> String {
    let mut out = response.content.clone();
    for row in response.buttons.iter().flatten() {
        let rendered: Vec<String> = row
            .iter()
            .map(|b| format!("[{} → !{}]", b.label, b.value))
            .collect();
        out.push('\n');
        out.push_str(&rendered.join("  "));
    }
    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            // Print prompt
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(payload) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        let msg = IncomingMessage::new("cli", CLI_USER_ID, CLI_USER_ID, payload)
                            .with_user_name(CLI_USER_NAME);
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", format_response(&response));
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
