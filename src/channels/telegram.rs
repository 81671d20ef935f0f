//! Telegram channel — long-polls the Bot API for updates.
//!
//! Handles typed messages and inline-keyboard taps (`callback_query`).
//! Button prompts are sent as `inline_keyboard` markup; in a private chat a
//! reply to a tap edits the message that carried the buttons when it can.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::beta::Button;
use crate::channels::{
    Channel, IncomingMessage, MessageMetadata, MessageStream, OutgoingResponse, Payload,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const CHANNEL_NAME: &str = "telegram";

/// A Bot API call that returned `ok: false`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiFailure {
    error_code: Option<i64>,
    description: String,
}

/// Thin Bot API client shared by the poller and the sender.
struct TelegramApi {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramApi {
    fn url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// POST a JSON body and unwrap the `result` field.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ApiFailure> {
        let resp = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiFailure {
                error_code: None,
                description: e.to_string(),
            })?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| ApiFailure {
            error_code: Some(i64::from(status.as_u16())),
            description: format!("unreadable response: {e}"),
        })?;

        if data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }
        Err(ApiFailure {
            error_code: data
                .get("error_code")
                .and_then(Value::as_i64)
                .or(Some(i64::from(status.as_u16()))),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
    }
}

/// Telegram Bot API channel using long-polling.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    allowed_users: Arc<Vec<String>>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            api: Arc::new(TelegramApi {
                bot_token,
                client: reqwest::Client::new(),
            }),
            allowed_users: Arc::new(allowed_users),
        }
    }

    /// Check if a username or id is in the allowed list.
    pub fn is_user_allowed(&self, identity: &str) -> bool {
        check_user_allowed(&self.allowed_users, [identity])
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.allowed_users, identities)
    }

    /// Send text with optional buttons. Long text is split; buttons go on
    /// the last chunk.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Option<&[Vec<Button>]>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if let (true, Some(rows)) = (i == last, buttons) {
                body["reply_markup"] = inline_keyboard(rows);
            }
            self.api
                .call("sendMessage", &body)
                .await
                .map_err(|f| classify_failure(f, chat_id))?;
        }
        Ok(())
    }

    /// Replace the text (and buttons) of a message the bot sent earlier.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        buttons: Option<&[Vec<Button>]>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(rows) = buttons {
            body["reply_markup"] = inline_keyboard(rows);
        }
        self.api
            .call("editMessageText", &body)
            .await
            .map(|_| ())
            .map_err(|f| classify_failure(f, chat_id))
    }

    /// Stop the loading indicator on a tapped button.
    async fn answer_callback(&self, callback_id: &str) {
        let body = json!({ "callback_query_id": callback_id });
        if let Err(f) = self.api.call("answerCallbackQuery", &body).await {
            tracing::debug!(error = %f.description, "answerCallbackQuery failed");
        }
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api = Arc::clone(&self.api);
        let allowed_users = Arc::clone(&self.allowed_users);

        let bot_username = match self.api.call("getMe", &json!({})).await {
            Ok(me) => me.get("username").and_then(Value::as_str).map(String::from),
            Err(f) => {
                tracing::warn!(error = %f.description, "getMe failed; accepting commands for any bot");
                None
            }
        };

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let result = match api.call("getUpdates", &body).await {
                    Ok(r) => r,
                    Err(f) => {
                        tracing::warn!(error = %f.description, "Telegram poll error");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(updates) = result.as_array() else {
                    continue;
                };

                for update in updates {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    if addressed_to_other_bot(&incoming.payload, bot_username.as_deref()) {
                        tracing::debug!(
                            chat_id = incoming.chat_id,
                            "Telegram: ignoring command addressed to another bot"
                        );
                        continue;
                    }

                    let user_id = incoming.user_id.to_string();
                    let username = incoming.metadata.username.as_deref().unwrap_or("unknown");
                    if !check_user_allowed(&allowed_users, [username, user_id.as_str()]) {
                        tracing::warn!(
                            username,
                            user_id = incoming.user_id,
                            "Telegram: ignoring message from unauthorized user"
                        );
                        continue;
                    }

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        if let Some(callback_id) = msg.metadata.callback_id.as_deref() {
            self.answer_callback(callback_id).await;
        }
        if response.is_empty() {
            return Ok(());
        }

        let buttons = response.buttons.as_deref();

        if let Some(message_id) = edit_target(msg, &response.content) {
            match self
                .edit_message(msg.chat_id, message_id, &response.content, buttons)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e @ ChannelError::BotKicked { .. }) => return Err(e),
                Err(e) => {
                    tracing::debug!(error = %e, "editMessageText failed; sending a new message");
                }
            }
        }

        self.send_message(msg.chat_id, &response.content, buttons)
            .await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.api
            .call("getMe", &json!({}))
            .await
            .map(|_| ())
            .map_err(|f| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: f.description,
            })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Turn one `getUpdates` entry into an inbound message.
///
/// Returns `None` for updates that are neither a text message nor a button
/// tap on a message the bot can still see.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    if let Some(callback) = update.get("callback_query") {
        let data = callback.get("data").and_then(Value::as_str)?;
        let from = callback.get("from")?;
        let message = callback.get("message")?;
        let chat = message.get("chat")?;

        let mut metadata = sender_metadata(from, chat);
        metadata.message_id = message.get("message_id").and_then(Value::as_i64);
        metadata.callback_id = callback.get("id").and_then(Value::as_str).map(String::from);

        return build_incoming(from, chat, Payload::Choice(data.to_string()), metadata);
    }

    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let from = message.get("from")?;
    let chat = message.get("chat")?;

    let mut metadata = sender_metadata(from, chat);
    metadata.message_id = message.get("message_id").and_then(Value::as_i64);

    build_incoming(from, chat, Payload::Text(text.to_string()), metadata)
}

fn build_incoming(
    from: &Value,
    chat: &Value,
    payload: Payload,
    metadata: MessageMetadata,
) -> Option<IncomingMessage> {
    let user_id = from.get("id").and_then(Value::as_i64)?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;

    let display = metadata
        .username
        .clone()
        .or_else(|| metadata.first_name.clone())
        .unwrap_or_else(|| user_id.to_string());

    Some(
        IncomingMessage::new(CHANNEL_NAME, user_id, chat_id, payload)
            .with_user_name(display)
            .with_metadata(metadata),
    )
}

fn sender_metadata(from: &Value, chat: &Value) -> MessageMetadata {
    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);
    MessageMetadata {
        username: text(from, "username"),
        first_name: text(from, "first_name"),
        last_name: text(from, "last_name"),
        language_code: text(from, "language_code"),
        is_bot: from.get("is_bot").and_then(Value::as_bool).unwrap_or(false),
        chat_title: text(chat, "title"),
        chat_type: text(chat, "type"),
        ..Default::default()
    }
}

/// The message a reply should replace, if any.
///
/// Only taps in a private chat are answered in place. In a group the tapped
/// keyboard can sit on another user's prompt, so the reply goes out as a new
/// message instead.
fn edit_target(msg: &IncomingMessage, content: &str) -> Option<i64> {
    if !matches!(msg.payload, Payload::Choice(_))
        || !msg.is_private()
        || content.len() > TELEGRAM_MAX_MESSAGE_LENGTH
    {
        return None;
    }
    msg.metadata.message_id
}

/// `/start@OtherBot` in a group is meant for another bot.
///
/// Without a known username every command is accepted.
fn addressed_to_other_bot(payload: &Payload, bot_username: Option<&str>) -> bool {
    let (Payload::Text(text), Some(me)) = (payload, bot_username) else {
        return false;
    };
    text.split_whitespace()
        .next()
        .and_then(|first| first.strip_prefix('/'))
        .and_then(|command| command.split_once('@'))
        .is_some_and(|(_, target)| !target.eq_ignore_ascii_case(me))
}

/// Build `reply_markup` for button rows.
fn inline_keyboard(rows: &[Vec<Button>]) -> Value {
    let keyboard: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.value }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": keyboard })
}

/// Map a Bot API failure onto a channel error.
fn classify_failure(failure: ApiFailure, chat_id: i64) -> ChannelError {
    let description = failure.description.to_ascii_lowercase();
    if description.contains("bot was kicked") || description.contains("bot was blocked") {
        return ChannelError::BotKicked {
            name: CHANNEL_NAME.into(),
            chat_id,
        };
    }
    if failure.error_code == Some(429)
        || description.contains("too many requests")
        || description.contains("rate limit")
    {
        return ChannelError::RateLimited {
            name: CHANNEL_NAME.into(),
        };
    }
    ChannelError::SendFailed {
        name: CHANNEL_NAME.into(),
        reason: failure.description,
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Largest char boundary within the limit.
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }

        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
