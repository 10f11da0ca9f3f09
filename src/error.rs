use crate::guild::GuildField;
use thiserror::Error;

/// Failures raised by the stores and the dispatch core.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Guild field `{0}` was read before it was loaded")]
    FieldNotLoaded(GuildField),

    #[error("A command cache already exists for channel {channel_id} and user {user_id}")]
    SessionExists { channel_id: u64, user_id: u64 },

    #[error("Duplicate command name: {0}")]
    DuplicateCommand(String),

    #[error("Cooldown of {requested} is longer than the {limit} usage retention window")]
    CooldownTooLong { requested: String, limit: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
