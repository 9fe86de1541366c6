use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{File, Input},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{path::Path, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{PlaybackHandle, VoiceConnection, VoicePlatform};
use crate::{audio::worker::CompletionTicket, error::MusicError};

/// [`VoicePlatform`] backed by the songbird voice manager registered on the
/// serenity client.
pub struct SongbirdPlatform {
    manager: Arc<Songbird>,
}

impl SongbirdPlatform {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoicePlatform for SongbirdPlatform {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, MusicError> {
        match self.manager.join(guild_id, channel_id).await {
            Ok(call) => {
                info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                Ok(Arc::new(SongbirdConnection {
                    guild_id,
                    channel_id: SyncMutex::new(channel_id),
                    call,
                    manager: self.manager.clone(),
                }))
            }
            Err(e) => {
                error!("Error al conectar al canal de voz: {:?}", e);
                Err(MusicError::Connection(e.to_string()))
            }
        }
    }

    async fn abandon(&self, guild_id: GuildId) {
        if let Err(e) = self.manager.remove(guild_id).await {
            debug!("Nada que liberar en guild {}: {}", guild_id, e);
        }
    }
}

/// One songbird call, held until [`VoiceConnection::disconnect`].
pub struct SongbirdConnection {
    guild_id: GuildId,
    /// Follows moves reported by the gateway
    channel_id: SyncMutex<ChannelId>,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> ChannelId {
        *self.channel_id.lock()
    }

    fn moved_to(&self, channel_id: ChannelId) {
        info!("🔀 Bot movido al canal {} en guild {}", channel_id, self.guild_id);
        *self.channel_id.lock() = channel_id;
    }

    async fn play(
        &self,
        artifact: &Path,
        volume: f32,
        on_end: CompletionTicket,
    ) -> Result<Box<dyn PlaybackHandle>, MusicError> {
        let input: Input = File::new(artifact.to_path_buf()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        if let Err(e) = register_track(&handle, self.guild_id, volume, &on_end) {
            // El worker avanza igual: no dejar el track sonando
            let _ = handle.stop();
            return Err(e);
        }

        Ok(Box::new(SongbirdTrack(handle)))
    }

    async fn disconnect(&self) -> Result<(), MusicError> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))?;

        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

fn register_track(
    handle: &TrackHandle,
    guild_id: GuildId,
    volume: f32,
    on_end: &CompletionTicket,
) -> Result<(), MusicError> {
    handle
        .set_volume(volume)
        .map_err(|e| MusicError::Pipeline(e.to_string()))?;

    // Fin natural, stop() o error: todos despiertan al worker
    for event in [TrackEvent::End, TrackEvent::Error] {
        handle
            .add_event(
                Event::Track(event),
                TrackEndNotifier {
                    guild_id,
                    ticket: on_end.clone(),
                },
            )
            .map_err(|e| MusicError::Pipeline(e.to_string()))?;
    }
    Ok(())
}

struct SongbirdTrack(TrackHandle);

impl PlaybackHandle for SongbirdTrack {
    fn set_volume(&self, volume: f32) -> Result<(), MusicError> {
        self.0
            .set_volume(volume)
            .map_err(|e| MusicError::Pipeline(e.to_string()))
    }

    fn pause(&self) -> Result<(), MusicError> {
        self.0.pause().map_err(|e| MusicError::Pipeline(e.to_string()))
    }

    fn resume(&self) -> Result<(), MusicError> {
        self.0.play().map_err(|e| MusicError::Pipeline(e.to_string()))
    }

    fn stop(&self) -> Result<(), MusicError> {
        self.0.stop().map_err(|e| MusicError::Pipeline(e.to_string()))
    }
}

/// Handler para cuando termina (o falla) una canción
struct TrackEndNotifier {
    guild_id: GuildId,
    ticket: CompletionTicket,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    warn!("❌ Error en track para guild {}: {:?}", self.guild_id, e);
                }
            }
        }

        debug!("🎵 Track terminó en guild {}", self.guild_id);
        self.ticket.signal();
        None
    }
}
