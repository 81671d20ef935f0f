//! Main bot loop — reads every channel, runs each user's messages through
//! the sign-up flow in order, and sends the replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;

use crate::beta::{FlowController, InboundEvent, prompts};
use crate::bot::commands::{Command, CommandParser};
use crate::bot::lanes::{LaneHandler, Lanes};
use crate::channels::{ChannelManager, IncomingMessage, OutgoingResponse, Payload};
use crate::error::{ChannelError, FlowError, Result};
use crate::help;
use crate::store::{ChatLogEntry, Database, Group, UserProfile};

/// Handles one message for one user.
pub struct MessageHandler {
    flow: FlowController,
    db: Arc<dyn Database>,
    channels: Arc<ChannelManager>,
}

impl MessageHandler {
    pub fn new(
        flow: FlowController,
        db: Arc<dyn Database>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self { flow, db, channels }
    }

    /// Work out the reply for a message, if any.
    pub async fn reply_for(&self, message: &IncomingMessage) -> Option<OutgoingResponse> {
        match CommandParser::parse(&message.payload) {
            Command::Help => Some(help::help_prompt().into()),
            Command::Unknown(command) => {
                tracing::debug!(user_id = message.user_id, command = %command, "Ignoring unknown command");
                None
            }
            Command::Flow(answer) => {
                let event = InboundEvent::new(
                    message.user_id,
                    message.chat_id,
                    message.user_name.as_str(),
                    answer,
                );
                match self.flow.handle(&event).await {
                    Ok(Some(response)) => Some(response.prompt.into()),
                    Ok(None) => None,
                    Err(FlowError::SubmissionFailed { user_id, source }) => {
                        tracing::error!(user_id, error = %source, "Application submission failed");
                        let record = self.flow.store().load(user_id).await;
                        Some(prompts::submit_failed(&record).into())
                    }
                }
            }
        }
    }

    /// Record the message, its sender, and the chat it came from.
    ///
    /// Failures are logged and never affect the reply.
    async fn record_activity(&self, message: &IncomingMessage, reply: &OutgoingResponse) {
        let meta = &message.metadata;
        let username = meta
            .username
            .clone()
            .unwrap_or_else(|| message.user_name.clone());

        let message_type = match &message.payload {
            Payload::Text(_) => reply.content.clone(),
            Payload::Choice(value) => value.clone(),
        };
        let entry = ChatLogEntry {
            message_id: meta.message_id,
            user_id: message.user_id,
            username,
            chat_id: message.chat_id,
            text: message.payload.as_str().to_string(),
            message_type,
            timestamp: message.received_at,
        };
        if let Err(e) = self.db.log_chat_message(&entry).await {
            tracing::warn!(user_id = message.user_id, error = %e, "Failed to log chat message");
        }

        let profile = UserProfile {
            user_id: message.user_id,
            first_name: meta
                .first_name
                .clone()
                .unwrap_or_else(|| message.user_name.clone()),
            last_name: meta.last_name.clone(),
            username: meta.username.clone(),
            language_code: meta.language_code.clone(),
            is_bot: meta.is_bot,
            is_in_group: !message.is_private(),
            last_updated: Utc::now(),
        };
        if let Err(e) = self.db.log_user_profile(&profile).await {
            tracing::warn!(user_id = message.user_id, error = %e, "Failed to log user profile");
        }

        if !message.is_private() {
            self.touch_group(message).await;
        }
    }

    /// Make sure the chat is stored as an active group.
    async fn touch_group(&self, message: &IncomingMessage) {
        let name = message
            .metadata
            .chat_title
            .clone()
            .unwrap_or_else(|| message.chat_id.to_string());
        let group = Group {
            group_id: message.chat_id,
            name,
            is_active: true,
        };

        let result = match self.db.get_group(group.group_id).await {
            Ok(None) => self.db.save_group(&group).await,
            Ok(Some(existing)) if existing != group => self.db.update_group(&group).await,
            Ok(Some(_)) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(group_id = group.group_id, error = %e, "Failed to record group");
        }
    }

    async fn send(&self, message: &IncomingMessage, reply: OutgoingResponse) {
        match self.channels.respond(message, reply).await {
            Ok(()) => {}
            Err(ChannelError::BotKicked { chat_id, .. }) => {
                tracing::info!(chat_id, "Bot is no longer in chat; marking group inactive");
                if let Err(e) = self.db.deactivate_group(chat_id).await {
                    tracing::warn!(chat_id, error = %e, "Failed to deactivate group");
                }
            }
            Err(e) => {
                tracing::warn!(
                    channel = %message.channel,
                    chat_id = message.chat_id,
                    error = %e,
                    "Failed to send reply"
                );
            }
        }
    }
}

#[async_trait]
impl LaneHandler for MessageHandler {
    type Item = IncomingMessage;

    async fn handle(&self, message: IncomingMessage) {
        tracing::debug!(
            user_id = message.user_id,
            channel = %message.channel,
            "Received message"
        );

        let Some(reply) = self.reply_for(&message).await else {
            return;
        };
        self.record_activity(&message, &reply).await;
        self.send(&message, reply).await;
    }
}

/// The bot: channels in, per-user lanes, replies out.
pub struct BetaBot {
    channels: Arc<ChannelManager>,
    lanes: Lanes<MessageHandler>,
}

impl BetaBot {
    pub fn new(
        flow: FlowController,
        db: Arc<dyn Database>,
        channels: ChannelManager,
        lane_idle: Duration,
    ) -> Self {
        let channels = Arc::new(channels);
        let handler = Arc::new(MessageHandler::new(flow, db, Arc::clone(&channels)));
        Self {
            channels,
            lanes: Lanes::new(handler, lane_idle),
        }
    }

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self) -> Result<()> {
        let mut message_stream = self.channels.start_all().await?;

        tracing::info!(channels = ?self.channels.names(), "Beta bot ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(m) => m,
                        None => {
                            tracing::info!("All channel streams ended, shutting down...");
                            break;
                        }
                    }
                }
            };

            self.lanes.dispatch(message.user_id, message).await;
        }

        self.lanes.close().await;
        self.channels.shutdown_all().await?;
        Ok(())
    }
}
