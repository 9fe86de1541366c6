use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    queue::{estimate_wait, Eta, PlaybackQueue, QueueEntry},
    skip_votes::{SkipVoteTracker, VoteResult},
    worker::{self, CompletionSignal, WorkerPhase},
};
use crate::{
    error::{MusicError, Result},
    voice::{PlaybackHandle, VoiceConnection},
};

pub const MAX_VOLUME: u32 = 200;

/// Per-guild limits taken from the bot configuration.
#[derive(Debug, Clone)]
pub struct GuildSettings {
    pub capacity: usize,
    /// Percent, 0-200
    pub default_volume: u32,
    /// `None` waits for staging indefinitely
    pub staging_timeout: Option<Duration>,
}

/// The track the worker is currently playing.
pub struct NowPlaying {
    pub entry: Arc<QueueEntry>,
    pub handle: Box<dyn PlaybackHandle>,
}

/// Playback state of one guild: queue, current track, voice connection,
/// volume, skip votes and the audio worker that ties them together.
pub struct GuildMusicState {
    guild_id: GuildId,
    queue: PlaybackQueue,
    now_playing: Mutex<Option<NowPlaying>>,
    voice: Mutex<Option<Arc<dyn VoiceConnection>>>,
    volume: AtomicU32,
    votes: Mutex<SkipVoteTracker>,
    completion: Arc<CompletionSignal>,
    phase: Mutex<WorkerPhase>,
    staging_timeout: Option<Duration>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GuildMusicState {
    /// Creates the state and starts its audio worker.
    pub fn spawn(guild_id: GuildId, settings: &GuildSettings) -> Arc<Self> {
        let state = Arc::new(Self {
            guild_id,
            queue: PlaybackQueue::new(settings.capacity),
            now_playing: Mutex::new(None),
            voice: Mutex::new(None),
            volume: AtomicU32::new(settings.default_volume.min(MAX_VOLUME)),
            votes: Mutex::new(SkipVoteTracker::new()),
            completion: CompletionSignal::new(),
            phase: Mutex::new(WorkerPhase::Idle),
            staging_timeout: settings.staging_timeout,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(worker::run(state.clone()));
        *state.worker.lock() = Some(handle);
        state
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Cancelled on teardown; background staging listens to it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether [`GuildMusicState::teardown`] has started.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.lock()
    }

    pub(super) fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.lock() = phase;
    }

    pub(super) fn completion(&self) -> Arc<CompletionSignal> {
        self.completion.clone()
    }

    pub(super) fn staging_timeout(&self) -> Option<Duration> {
        self.staging_timeout
    }

    // Voz

    pub fn voice(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.voice.lock().clone()
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.voice.lock().as_ref().map(|voice| voice.channel_id())
    }

    /// Stores the guild's connection. After teardown the connection is
    /// disconnected instead and `Cancelled` is returned.
    pub async fn attach_voice(&self, connection: Arc<dyn VoiceConnection>) -> Result<()> {
        let rejected = {
            let mut voice = self.voice.lock();
            if self.is_closed() {
                Some(connection)
            } else {
                *voice = Some(connection);
                None
            }
        };

        let Some(connection) = rejected else {
            return Ok(());
        };
        warn!(
            "🔌 Conexión a {} llegó tras el teardown de guild {}, desconectando",
            connection.channel_id(),
            self.guild_id
        );
        if let Err(e) = connection.disconnect().await {
            warn!("No se pudo desconectar de {}: {}", connection.channel_id(), e);
        }
        Err(MusicError::Cancelled)
    }

    /// Follows a move of the bot to another channel made outside the bot.
    pub fn voice_moved(&self, channel_id: ChannelId) -> bool {
        match self.voice.lock().as_ref() {
            Some(voice) if voice.channel_id() != channel_id => {
                voice.moved_to(channel_id);
                true
            }
            _ => false,
        }
    }

    pub fn detach_voice(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.voice.lock().take()
    }

    // Reproducción

    pub(super) fn set_now_playing(&self, now_playing: NowPlaying) {
        *self.now_playing.lock() = Some(now_playing);
    }

    pub(super) fn take_now_playing(&self) -> Option<NowPlaying> {
        self.now_playing.lock().take()
    }

    pub fn current(&self) -> Option<Arc<QueueEntry>> {
        self.now_playing
            .lock()
            .as_ref()
            .map(|now_playing| now_playing.entry.clone())
    }

    pub fn is_playing(&self) -> bool {
        self.voice.lock().is_some() && self.now_playing.lock().is_some()
    }

    fn with_handle<T>(&self, f: impl FnOnce(&dyn PlaybackHandle) -> T) -> Option<T> {
        self.now_playing
            .lock()
            .as_ref()
            .map(|now_playing| f(now_playing.handle.as_ref()))
    }

    pub fn pause(&self) -> Result<()> {
        self.with_handle(|handle| handle.pause())
            .ok_or(MusicError::NotPlaying)?
    }

    pub fn resume(&self) -> Result<()> {
        self.with_handle(|handle| handle.resume())
            .ok_or(MusicError::NotPlaying)?
    }

    // Volumen

    pub fn volume(&self) -> u32 {
        self.volume.load(Ordering::SeqCst)
    }

    /// Gain applied to the pipeline (1.0 = 100%).
    pub fn gain(&self) -> f32 {
        self.volume() as f32 / 100.0
    }

    /// Stores the volume; returns whether a playing track was updated live.
    pub fn set_volume(&self, percent: u32) -> Result<bool> {
        if percent > MAX_VOLUME {
            return Err(MusicError::OutOfRange(percent));
        }
        self.volume.store(percent, Ordering::SeqCst);

        match self.with_handle(|handle| handle.set_volume(percent as f32 / 100.0)) {
            Some(result) => {
                result?;
                info!("🔊 Volumen ajustado a {}% en guild {}", percent, self.guild_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Votos

    pub(super) fn reset_votes(&self) {
        self.votes.lock().reset();
    }

    pub fn on_membership_changed(&self, member_count: usize) {
        self.votes.lock().on_membership_changed(member_count);
    }

    /// `(votes, required)` for the current track.
    pub fn vote_tally(&self) -> (usize, usize) {
        let votes = self.votes.lock();
        (votes.votes(), votes.required())
    }

    /// Counts a skip vote, stopping the track when it forces or passes.
    pub fn register_skip_vote(&self, voter: UserId) -> Result<VoteResult> {
        let current = self.current().ok_or(MusicError::NotPlaying)?;
        let result = self
            .votes
            .lock()
            .register_vote(voter, current.requester() == voter);

        if result.skips() {
            self.skip();
        }
        Ok(result)
    }

    /// Clears votes and stops the current track; the worker then advances.
    pub fn skip(&self) -> bool {
        self.reset_votes();
        match self.with_handle(|handle| handle.stop()) {
            Some(result) => {
                if let Err(e) = result {
                    debug!("Track ya detenido: {}", e);
                }
                info!("⏭️ Canción saltada en guild {}", self.guild_id);
                true
            }
            None => false,
        }
    }

    /// `None` when nothing is playing.
    pub fn eta(&self, user: UserId) -> Option<Eta> {
        let current = self.current()?;
        Some(estimate_wait(current.remaining(), &self.queue.snapshot(), user))
    }

    /// Ordered shutdown: stop staging, stop the worker (which releases the
    /// playing track), release queued entries, disconnect voice.
    ///
    /// Each step's failure is logged and the remaining steps still run.
    pub async fn teardown(&self) {
        let guild_id = self.guild_id;
        debug!("teardown {}: worker en fase {:?}", guild_id, self.phase());

        self.cancel.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.abort();
            match worker.await {
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("teardown {}: el worker terminó con error: {}", guild_id, e),
                Ok(()) => {}
            }
        }

        let queued = self.queue.close();
        let staged = queued.iter().filter(|entry| entry.is_playable()).count();
        for entry in queued {
            entry.release();
        }
        debug!("teardown {}: {} descargas eliminadas", guild_id, staged);

        if let Some(voice) = self.detach_voice() {
            if let Err(e) = voice.disconnect().await {
                warn!("teardown {}: no se pudo desconectar: {}", guild_id, e);
            }
        }

        info!("⏹️ Estado de música eliminado en guild {}", guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::queue::tests::entry,
        voice::fake::{FakePlatform, VoiceEvent},
    };

    fn settings() -> GuildSettings {
        GuildSettings {
            capacity: 3,
            default_volume: 50,
            staging_timeout: None,
        }
    }

    #[tokio::test]
    async fn volume_bounds() {
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());

        assert_eq!(state.set_volume(201), Err(MusicError::OutOfRange(201)));
        assert_eq!(state.volume(), 50);
        assert_eq!(state.set_volume(200), Ok(false));
        assert_eq!(state.set_volume(0), Ok(false));
        assert_eq!(state.volume(), 0);

        state.teardown().await;
    }

    #[tokio::test]
    async fn controls_require_a_playing_track() {
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());

        assert!(!state.is_playing());
        assert_eq!(state.pause(), Err(MusicError::NotPlaying));
        assert_eq!(state.register_skip_vote(UserId::new(3)), Err(MusicError::NotPlaying));
        assert!(state.eta(UserId::new(3)).is_none());
        assert!(!state.skip());

        state.teardown().await;
    }

    #[tokio::test]
    async fn live_volume_only_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, mut events) = FakePlatform::new();
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());
        state
            .attach_voice(platform.connection(ChannelId::new(7)))
            .await
            .unwrap();

        let song = entry(1, "song", 60);
        let path = dir.path().join("song.opus");
        std::fs::write(&path, b"audio").unwrap();
        song.finish_staging(Ok(path));
        state.queue().enqueue(song).unwrap();

        loop {
            if let Some(VoiceEvent::Played { volume, .. }) = events.recv().await {
                assert_eq!(volume, 0.5);
                break;
            }
        }

        assert_eq!(state.set_volume(120), Ok(true));
        assert_eq!(events.recv().await, Some(VoiceEvent::Volume(1.2)));

        state.teardown().await;
    }

    #[tokio::test]
    async fn teardown_releases_queue_and_voice() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, mut events) = FakePlatform::new();
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());

        // El worker queda esperando la descarga de "blocked"
        let waiting = entry(1, "waiting", 60);
        state.queue().enqueue(entry(1, "blocked", 60)).unwrap();
        state.queue().enqueue(waiting.clone()).unwrap();
        state
            .attach_voice(platform.connection(ChannelId::new(7)))
            .await
            .unwrap();

        state.teardown().await;

        let late = dir.path().join("late.opus");
        std::fs::write(&late, b"audio").unwrap();
        assert!(!waiting.finish_staging(Ok(late.clone())));
        assert!(!late.exists());
        assert!(state.queue().is_empty());
        assert!(state.voice().is_none());
        assert_eq!(
            events.recv().await,
            Some(VoiceEvent::Disconnected(ChannelId::new(7)))
        );

        // Idempotente
        state.teardown().await;
    }

    #[tokio::test]
    async fn connection_arriving_after_teardown_is_released() {
        let (platform, mut events) = FakePlatform::new();
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());
        state.teardown().await;

        assert_eq!(
            state.attach_voice(platform.connection(ChannelId::new(7))).await,
            Err(MusicError::Cancelled)
        );
        assert!(state.voice().is_none());
        assert_eq!(
            events.recv().await,
            Some(VoiceEvent::Disconnected(ChannelId::new(7)))
        );
        assert_eq!(state.queue().enqueue(entry(1, "late", 60)), Err(MusicError::Cancelled));
    }

    #[tokio::test]
    async fn follows_external_channel_moves() {
        let (platform, _events) = FakePlatform::new();
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());
        assert!(!state.voice_moved(ChannelId::new(8)));

        state
            .attach_voice(platform.connection(ChannelId::new(7)))
            .await
            .unwrap();
        assert!(!state.voice_moved(ChannelId::new(7)));
        assert!(state.voice_moved(ChannelId::new(8)));
        assert_eq!(state.voice_channel(), Some(ChannelId::new(8)));

        state.teardown().await;
    }
}
