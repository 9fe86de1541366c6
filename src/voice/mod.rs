//! # Voice Module
//!
//! Boundary between the playback core and the chat platform's voice layer.
//!
//! - [`VoicePlatform`] opens voice connections for a guild.
//! - [`VoiceConnection`] is a borrowed handle to one platform-managed
//!   connection; it is released with [`VoiceConnection::disconnect`], never
//!   destroyed directly.
//! - [`PlaybackHandle`] controls one track started on a connection.
//!
//! The songbird-backed implementation lives in [`discord`]; tests use the fakes in
//! `fake`.

pub mod discord;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{path::Path, sync::Arc};

use crate::{audio::worker::CompletionTicket, error::MusicError};

pub use discord::SongbirdPlatform;

#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Joins `channel`, returning the established connection.
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, MusicError>;

    /// Best-effort release of whatever connection state exists for the guild,
    /// including a half-established one after a failed connect.
    async fn abandon(&self, guild_id: GuildId);
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// Records that the connection now lives in `channel_id` (bot moved by a
    /// user or by the platform).
    fn moved_to(&self, channel_id: ChannelId);

    /// Starts playing a local artifact at `volume` gain (1.0 = 100%).
    ///
    /// `on_end` must be signalled once the track stops for any reason:
    /// natural end, [`PlaybackHandle::stop`], or a pipeline error.
    async fn play(
        &self,
        artifact: &Path,
        volume: f32,
        on_end: CompletionTicket,
    ) -> Result<Box<dyn PlaybackHandle>, MusicError>;

    async fn disconnect(&self) -> Result<(), MusicError>;
}

/// Control surface of one playing track.
pub trait PlaybackHandle: Send + Sync {
    fn set_volume(&self, volume: f32) -> Result<(), MusicError>;
    fn pause(&self) -> Result<(), MusicError>;
    fn resume(&self) -> Result<(), MusicError>;
    fn stop(&self) -> Result<(), MusicError>;
}
