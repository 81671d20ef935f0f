//! ChannelManager — starts every channel and routes responses back by name.

use std::collections::HashMap;

use futures::stream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Owns the registered channels.
#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. A channel with the same name replaces the old one.
    pub fn add(&mut self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        if self.channels.insert(name.clone(), channel).is_some() {
            tracing::warn!(channel = %name, "Replaced an already registered channel");
        }
    }

    /// Names of the registered channels, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start all channels and merge their streams.
    ///
    /// A channel that fails to start is logged and skipped; the call fails
    /// only when none could be started.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for (name, channel) in &self.channels {
            match channel.start().await {
                Ok(s) => {
                    tracing::info!(channel = %name, "Channel started");
                    streams.push(s);
                }
                Err(e) => tracing::error!(channel = %name, error = %e, "Channel failed to start"),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Send a response through the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(&msg.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(msg.channel.clone()))?;
        channel.respond(msg, response).await
    }

    /// Run every channel's health check; returns the failures.
    pub async fn health_check_all(&self) -> Vec<(String, ChannelError)> {
        let mut failures = Vec::new();
        for (name, channel) in &self.channels {
            if let Err(e) = channel.health_check().await {
                failures.push((name.clone(), e));
            }
        }
        failures
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = %name, error = %e, "Channel shutdown failed");
            }
        }
        Ok(())
    }
}
