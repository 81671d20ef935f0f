//! Error types for the beta sign-up bot.

/// Errors that stop the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Bot was removed from chat {chat_id} on channel {name}")]
    BotKicked { name: String, chat_id: i64 },

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },

    #[error("No channel registered under name {0}")]
    UnknownChannel(String),
}

/// Errors raised by the sign-up flow itself.
///
/// Ignored events and invalid free text are not errors; the only failure the
/// flow reports is a submission the persistence layer refused.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Submission for user {user_id} was not persisted: {source}")]
    SubmissionFailed {
        user_id: i64,
        #[source]
        source: DatabaseError,
    },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
