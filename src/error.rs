use serenity::model::id::GuildId;
use thiserror::Error;

/// Errors raised by the music session subsystem.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("guild {0} already has an active music session")]
    SessionConflict(GuildId),

    #[error("queue position {index} is out of range (queue holds {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("the music session has already been closed")]
    SessionClosed,

    #[error("the music manager is shutting down")]
    ShutDown,

    #[error("the queue is full (maximum {0} tracks)")]
    QueueFull(usize),

    #[error("no tracks were given")]
    EmptyBatch,

    #[error("voice connection error: {0}")]
    Connection(String),

    #[error("no results for `{0}`")]
    NoMatches(String),

    #[error("failed to load track: {0}")]
    Load(String),
}

pub type Result<T> = std::result::Result<T, MusicError>;
