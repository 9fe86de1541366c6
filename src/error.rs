//! Error types for the playback core.

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the queue, the worker and the [`MusicService`] façade.
///
/// Every variant is reported once to the caller; nothing in the core retries.
///
/// [`MusicService`]: crate::audio::service::MusicService
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MusicError {
    /// The guild queue already holds `capacity` entries
    #[error("queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    /// The requester is not connected to any voice channel
    #[error("requester is not in a voice channel")]
    NotInVoiceChannel,

    /// The requester is connected, but not to the channel the bot plays in
    #[error("requester is not in the bot's voice channel")]
    NotInBotChannel,

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("no results for {0}")]
    NoResults(String),

    /// Playlists, live streams and pages without a single playable item
    #[error("media is a playlist, a stream or otherwise unsupported")]
    UnsupportedMedia,

    #[error("links to {0} are not supported")]
    BlockedSource(String),

    /// Volume above the 200% ceiling
    #[error("volume {0} is out of range (0-200)")]
    OutOfRange(u32),

    #[error("nothing is playing")]
    NotPlaying,

    /// Voice connect/disconnect failure reported by the platform
    #[error("voice connection failed: {0}")]
    Connection(String),

    /// The audio pipeline refused a command
    #[error("audio pipeline error: {0}")]
    Pipeline(String),

    #[error("staging failed: {0}")]
    StagingFailed(String),

    #[error("staging did not finish within {0:?}")]
    StagingTimeout(Duration),

    /// Work abandoned because the guild state was torn down
    #[error("cancelled")]
    Cancelled,
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, MusicError>;
