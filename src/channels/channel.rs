//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::beta::{Button, Prompt};
use crate::error::ChannelError;

/// Stream of inbound messages from a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// A typed message.
    Text(String),
    /// The value of a tapped button.
    Choice(String),
}

impl Payload {
    /// The raw text or button value.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::Choice(s) => s,
        }
    }
}

/// Transport details carried alongside a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Transport id of the message (for a tap: the message carrying the buttons).
    pub message_id: Option<i64>,
    /// Callback query id to acknowledge, for button taps.
    pub callback_id: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_bot: bool,
    pub chat_title: Option<String>,
    /// `private`, `group`, `supergroup`, or `channel`.
    pub chat_type: Option<String>,
}

/// A message received from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Name of the channel that produced it.
    pub channel: String,
    pub user_id: i64,
    pub chat_id: i64,
    /// Name to show for the sender.
    pub user_name: String,
    pub payload: Payload,
    pub metadata: MessageMetadata,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(channel: impl Into<String>, user_id: i64, chat_id: i64, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id,
            chat_id,
            user_name: String::new(),
            payload,
            metadata: MessageMetadata::default(),
            received_at: Utc::now(),
        }
    }

    pub fn text(channel: impl Into<String>, user_id: i64, chat_id: i64, text: &str) -> Self {
        Self::new(channel, user_id, chat_id, Payload::Text(text.to_string()))
    }

    pub fn choice(channel: impl Into<String>, user_id: i64, chat_id: i64, value: &str) -> Self {
        Self::new(channel, user_id, chat_id, Payload::Choice(value.to_string()))
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the message came from a one-to-one chat with the bot.
    pub fn is_private(&self) -> bool {
        match self.metadata.chat_type.as_deref() {
            Some(kind) => kind == "private",
            None => self.chat_id == self.user_id,
        }
    }
}

/// A reply to send back through a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingResponse {
    pub content: String,
    /// Button rows to attach, if any.
    pub buttons: Option<Vec<Vec<Button>>>,
}

impl OutgoingResponse {
    /// A plain text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            buttons: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.buttons.is_none()
    }
}

impl From<Prompt> for OutgoingResponse {
    fn from(prompt: Prompt) -> Self {
        Self {
            content: prompt.text,
            buttons: prompt.buttons,
        }
    }
}

/// A source and sink of chat messages.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short, unique name used to route responses.
    fn name(&self) -> &str;

    /// Start receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a response to the chat `msg` came from.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Check that the channel can reach its backend.
    async fn health_check(&self) -> Result<(), ChannelError>;

    /// Stop the channel.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
