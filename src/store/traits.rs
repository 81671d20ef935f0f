//! Persistence traits and the records the bot keeps besides applications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::beta::ApplicationRecord;
use crate::error::DatabaseError;

/// A chat the bot has been active in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: i64,
    pub name: String,
    pub is_active: bool,
}

/// One handled inbound message, with the bot's reply text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    /// Transport message id, when the transport has one.
    pub message_id: Option<i64>,
    pub user_id: i64,
    pub username: String,
    pub chat_id: i64,
    /// Text typed by the user, or the tapped button's value.
    pub text: String,
    /// Reply text for typed messages, the button value for taps.
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Last-seen profile of a user who talked to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    pub is_bot: bool,
    pub is_in_group: bool,
    pub last_updated: DateTime<Utc>,
}

/// Accepts completed applications.
///
/// Split out of [`Database`] so the sign-up flow depends only on the one
/// call it makes.
#[async_trait]
pub trait ApplicationSink: Send + Sync {
    /// Durably store one completed application.
    async fn submit_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError>;
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: ApplicationSink {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Applications ────────────────────────────────────────────────

    /// Submitted applications for a user, oldest first.
    async fn list_applications(&self, user_id: i64)
    -> Result<Vec<ApplicationRecord>, DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Insert a group. Fails with `Constraint` if it already exists.
    async fn save_group(&self, group: &Group) -> Result<(), DatabaseError>;

    /// Get a group by chat id.
    async fn get_group(&self, group_id: i64) -> Result<Option<Group>, DatabaseError>;

    /// Update a group's name and active flag.
    async fn update_group(&self, group: &Group) -> Result<(), DatabaseError>;

    /// Mark a group inactive (bot removed from the chat).
    async fn deactivate_group(&self, group_id: i64) -> Result<(), DatabaseError>;

    // ── Chat log ────────────────────────────────────────────────────

    /// Append a handled message to the chat log.
    async fn log_chat_message(&self, entry: &ChatLogEntry) -> Result<(), DatabaseError>;

    /// Most recent chat log entries for a chat, newest first.
    async fn list_chat_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Insert or update a user profile by `user_id`.
    async fn log_user_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError>;

    async fn get_user_profile(&self, user_id: i64) -> Result<Option<UserProfile>, DatabaseError>;
}
