//! Façade between the command handlers and the per-guild playback state.
//!
//! [`MusicService`] owns the guild registry. States are created with
//! [`MusicService::get_or_create`] (which starts the guild's audio worker
//! exactly once) and destroyed with [`MusicService::teardown`]; every other
//! method only looks states up.

use dashmap::DashMap;
use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::{debug, info, warn};

use super::{
    guild::{GuildMusicState, GuildSettings},
    queue::{remove_artifact, Eta, QueueEntry, Requester},
    skip_votes::VoteResult,
};
use crate::{
    error::{MusicError, Result},
    sources::{as_link, MediaResolver, ResolveOutcome, ResolvedTrack},
    voice::VoicePlatform,
};

static EMBED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[<>\[\]]").expect("valid embed regex"));

/// Service-wide settings taken from the bot configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub guild: GuildSettings,
    pub staging_dir: PathBuf,
    /// Hosts whose links are refused before resolution
    pub blocked_hosts: Vec<String>,
}

/// A successfully queued request.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub entry: Arc<QueueEntry>,
    /// 1-based position in the queue
    pub position: usize,
}

/// Snapshot of the track being played, for status commands.
#[derive(Debug, Clone)]
pub struct NowPlayingStatus {
    pub entry: Arc<QueueEntry>,
    pub votes: usize,
    pub required: usize,
}

pub struct MusicService {
    guilds: DashMap<GuildId, Arc<GuildMusicState>>,
    platform: Arc<dyn VoicePlatform>,
    resolver: Arc<dyn MediaResolver>,
    settings: ServiceSettings,
}

impl MusicService {
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        resolver: Arc<dyn MediaResolver>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            guilds: DashMap::new(),
            platform,
            resolver,
            settings,
        }
    }

    // Registro

    /// Returns the guild's state, creating it (and its worker) on first use.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildMusicState> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Creando estado de música para guild {}", guild_id);
                GuildMusicState::spawn(guild_id, &self.settings.guild)
            })
            .clone()
    }

    pub fn state(&self, guild_id: GuildId) -> Option<Arc<GuildMusicState>> {
        self.guilds.get(&guild_id).map(|state| state.clone())
    }

    pub fn active_guilds(&self) -> usize {
        self.guilds.len()
    }

    /// Removes and tears down the guild's state. Returns `false` if there was none.
    pub async fn teardown(&self, guild_id: GuildId) -> bool {
        let Some((_, state)) = self.guilds.remove(&guild_id) else {
            return false;
        };
        state.teardown().await;
        true
    }

    /// Tears down every guild; used on process shutdown.
    pub async fn shutdown(&self) {
        info!("🛑 Cerrando {} estados de música", self.active_guilds());
        let guilds: Vec<GuildId> = self.guilds.iter().map(|state| *state.key()).collect();

        futures::future::join_all(guilds.into_iter().map(|guild_id| self.teardown(guild_id))).await;
    }

    // Voz

    /// Connects to `channel_id`, moving an existing connection if needed.
    pub async fn join_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        let state = self.get_or_create(guild_id);

        if state.voice_channel() == Some(channel_id) {
            debug!("Ya conectado a {} en guild {}", channel_id, guild_id);
            return Ok(());
        }

        if let Some(old) = state.detach_voice() {
            if let Err(e) = old.disconnect().await {
                warn!("No se pudo dejar el canal {}: {}", old.channel_id(), e);
            }
        }

        match self.platform.connect(guild_id, channel_id).await {
            Ok(connection) => {
                // /stop pudo llegar mientras se conectaba
                state.attach_voice(connection).await?;
                info!("🔊 Conectado a canal {} en guild {}", channel_id, guild_id);
                Ok(())
            }
            Err(e) => {
                warn!("❌ Error al conectar a {} en guild {}: {}", channel_id, guild_id, e);
                self.platform.abandon(guild_id).await;
                Err(e)
            }
        }
    }

    /// Joins the requester's current voice channel.
    pub async fn summon(&self, guild_id: GuildId, requester: &Requester) -> Result<ChannelId> {
        let channel_id = requester.voice_channel.ok_or(MusicError::NotInVoiceChannel)?;
        self.join_channel(guild_id, channel_id).await?;
        Ok(channel_id)
    }

    pub fn bot_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.state(guild_id)?.voice_channel()
    }

    /// Records that the bot now sits in `channel_id` after being moved
    /// outside of `/join`. Returns whether the stored channel changed.
    pub fn on_bot_moved(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.state(guild_id)
            .is_some_and(|state| state.voice_moved(channel_id))
    }

    /// Recomputes the skip quota from the bot channel's occupancy.
    pub fn on_membership_changed(&self, guild_id: GuildId, member_count: usize) {
        if let Some(state) = self.state(guild_id) {
            state.on_membership_changed(member_count);
        }
    }

    // Cola

    /// Resolves `query`, queues it and starts staging it in the background.
    pub async fn enqueue_song(
        &self,
        guild_id: GuildId,
        query: &str,
        requester: &Requester,
    ) -> Result<Enqueued> {
        let state = self.get_or_create(guild_id);

        let bot_channel = match state.voice_channel() {
            Some(channel) => channel,
            None => self.summon(guild_id, requester).await?,
        };

        let queue = state.queue();
        if queue.is_full() {
            return Err(MusicError::QueueFull {
                capacity: queue.capacity(),
            });
        }

        if requester.voice_channel != Some(bot_channel) {
            return Err(MusicError::NotInBotChannel);
        }

        let query = sanitize_query(query);
        if let Some(host) = self.blocked_host(&query) {
            return Err(MusicError::BlockedSource(host));
        }

        let track = self.resolve_track(&query).await?;
        let entry = Arc::new(QueueEntry::new(requester, query, track));
        // Falla con Cancelled si el estado se cerró durante la resolución
        let position = queue.enqueue(entry.clone())?;
        info!(
            "➕ {} añadida en posición {} (guild {})",
            entry.title(),
            position,
            guild_id
        );

        self.spawn_staging(&state, entry.clone());
        Ok(Enqueued { entry, position })
    }

    async fn resolve_track(&self, query: &str) -> Result<ResolvedTrack> {
        match self.resolver.resolve(query).await {
            ResolveOutcome::Direct(track) => return Ok(track),
            ResolveOutcome::Unsupported => return Err(MusicError::UnsupportedMedia),
            ResolveOutcome::Failed(message) => return Err(MusicError::ExtractionFailed(message)),
            ResolveOutcome::SearchNeeded => {}
        }

        let candidates = self.resolver.search(query).await?;
        let first = candidates
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::NoResults(query.to_string()))?;
        debug!("🔍 Primer resultado para '{}': {}", query, first.url);

        match self.resolver.resolve(&first.url).await {
            ResolveOutcome::Direct(track) => Ok(track),
            ResolveOutcome::Failed(message) => Err(MusicError::ExtractionFailed(message)),
            ResolveOutcome::Unsupported | ResolveOutcome::SearchNeeded => {
                Err(MusicError::UnsupportedMedia)
            }
        }
    }

    fn spawn_staging(&self, state: &GuildMusicState, entry: Arc<QueueEntry>) {
        let resolver = self.resolver.clone();
        let dir = self.settings.staging_dir.clone();
        let cancel = state.cancellation();

        tokio::spawn(async move {
            let result = resolver.stage(entry.track(), &dir, &cancel).await;
            match result {
                Ok(path) if cancel.is_cancelled() => {
                    remove_artifact(&path);
                    entry.finish_staging(Err(MusicError::Cancelled.to_string()));
                }
                Ok(path) => {
                    entry.finish_staging(Ok(path));
                }
                Err(e) => {
                    if e != MusicError::Cancelled {
                        warn!(
                            "⚠️ Falló la descarga de {} ({}): {}",
                            entry.title(),
                            entry.query(),
                            e
                        );
                    }
                    entry.finish_staging(Err(e.to_string()));
                }
            }
        });
    }

    fn blocked_host(&self, query: &str) -> Option<String> {
        let url = as_link(query)?;
        let host = url.host_str()?.to_ascii_lowercase();
        self.settings
            .blocked_hosts
            .iter()
            .find(|blocked| host == **blocked || host.ends_with(&format!(".{}", blocked)))
            .cloned()
    }

    pub fn queue_snapshot(&self, guild_id: GuildId) -> Vec<Arc<QueueEntry>> {
        self.state(guild_id)
            .map(|state| state.queue().snapshot())
            .unwrap_or_default()
    }

    pub fn queue_length(&self, guild_id: GuildId) -> usize {
        self.state(guild_id).map_or(0, |state| state.queue().len())
    }

    // Controles

    /// Stored volume for the guild, or the configured default.
    pub fn volume(&self, guild_id: GuildId) -> u32 {
        self.state(guild_id)
            .map_or(self.settings.guild.default_volume, |state| state.volume())
    }

    /// Returns whether a playing track was updated live.
    pub fn set_volume(&self, guild_id: GuildId, percent: u32) -> Result<bool> {
        self.get_or_create(guild_id).set_volume(percent)
    }

    pub fn pause(&self, guild_id: GuildId) -> Result<()> {
        self.playing_state(guild_id)?.pause()
    }

    pub fn resume(&self, guild_id: GuildId) -> Result<()> {
        self.playing_state(guild_id)?.resume()
    }

    pub fn request_skip(&self, guild_id: GuildId, voter: UserId) -> Result<VoteResult> {
        self.playing_state(guild_id)?.register_skip_vote(voter)
    }

    /// Privileged skip that bypasses the vote.
    pub fn force_skip(&self, guild_id: GuildId) -> Result<()> {
        if self.playing_state(guild_id)?.skip() {
            Ok(())
        } else {
            Err(MusicError::NotPlaying)
        }
    }

    pub fn compute_eta(&self, guild_id: GuildId, user: UserId) -> Result<Eta> {
        self.playing_state(guild_id)?
            .eta(user)
            .ok_or(MusicError::NotPlaying)
    }

    /// Elapsed time and total length of the current track.
    pub fn progress(&self, guild_id: GuildId) -> Result<(Duration, Duration)> {
        let current = self
            .playing_state(guild_id)?
            .current()
            .ok_or(MusicError::NotPlaying)?;
        Ok((current.elapsed(), current.duration().unwrap_or_default()))
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<NowPlayingStatus> {
        let state = self.state(guild_id)?;
        let entry = state.current()?;
        let (votes, required) = state.vote_tally();
        Some(NowPlayingStatus {
            entry,
            votes,
            required,
        })
    }

    fn playing_state(&self, guild_id: GuildId) -> Result<Arc<GuildMusicState>> {
        self.state(guild_id)
            .filter(|state| state.is_playing())
            .ok_or(MusicError::NotPlaying)
    }
}

/// Strips the characters Discord uses to suppress link embeds.
pub fn sanitize_query(query: &str) -> String {
    EMBED_CHARS.replace_all(query.trim(), "").into_owned()
}
