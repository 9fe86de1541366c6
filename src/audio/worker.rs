//! Per-guild audio worker.
//!
//! One task per guild drains the [`PlaybackQueue`](super::queue::PlaybackQueue):
//!
//! ```text
//! Idle ─► WaitingForEntry ─► StagingWait ─► Playing ─┐
//!              ▲                                      │
//!              └──────────── completion ──────────────┘
//! ```
//!
//! Completion (natural end, skip, pipeline error) is an edge-triggered
//! [`CompletionSignal`]. Cleanup of the staged artifact is tied to a guard, so
//! aborting the task mid-playback still stops the track and deletes the file.

use parking_lot::Mutex;
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{
    guild::{GuildMusicState, NowPlaying},
    queue::QueueEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    WaitingForEntry,
    StagingWait,
    Playing,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    fired: bool,
}

/// Single-slot wakeup for "the current track is over".
///
/// Each track gets a fresh [`CompletionTicket`] from [`CompletionSignal::arm`];
/// signals from older tickets are ignored and repeated signals from the same
/// ticket collapse into one.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl CompletionSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a new generation, discarding any pending wakeup.
    pub fn arm(self: &Arc<Self>) -> CompletionTicket {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        slot.fired = false;
        CompletionTicket {
            signal: self.clone(),
            generation: slot.generation,
        }
    }

    /// Suspends until the armed ticket signals.
    pub async fn wait(&self) {
        loop {
            {
                let mut slot = self.slot.lock();
                if slot.fired {
                    slot.fired = false;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Handed to the voice pipeline for one track.
#[derive(Debug, Clone)]
pub struct CompletionTicket {
    signal: Arc<CompletionSignal>,
    generation: u64,
}

impl CompletionTicket {
    pub fn signal(&self) {
        {
            let mut slot = self.signal.slot.lock();
            if slot.generation != self.generation {
                debug!("Señal de fin obsoleta ignorada");
                return;
            }
            slot.fired = true;
        }
        self.signal.notify.notify_one();
    }
}

/// Releases everything a dequeued entry holds when dropped, including on
/// task abort while staging or playing.
struct PlaybackGuard {
    state: Arc<GuildMusicState>,
    entry: Arc<QueueEntry>,
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        if let Some(now_playing) = self.state.take_now_playing() {
            if let Err(e) = now_playing.handle.stop() {
                debug!("Track ya detenido: {}", e);
            }
        }
        self.entry.release();
        self.state.set_phase(WorkerPhase::Idle);
    }
}

/// Worker loop; runs until the task is aborted.
pub async fn run(state: Arc<GuildMusicState>) {
    let guild_id = state.guild_id();
    info!("🎛️ Worker de audio iniciado para guild {}", guild_id);

    loop {
        state.reset_votes();
        state.set_phase(WorkerPhase::WaitingForEntry);
        let entry = state.queue().dequeue().await;

        let guard = PlaybackGuard {
            state: state.clone(),
            entry: entry.clone(),
        };

        state.set_phase(WorkerPhase::StagingWait);
        match entry.wait_staged(state.staging_timeout()).await {
            Ok(artifact) => play(&state, &entry, artifact).await,
            Err(e) => warn!("⏭️ Saltando {} en guild {}: {}", entry.title(), guild_id, e),
        }

        // Fin de la canción: el guard borra el artefacto
        drop(guard);
    }
}

async fn play(state: &Arc<GuildMusicState>, entry: &Arc<QueueEntry>, artifact: PathBuf) {
    let Some(voice) = state.voice() else {
        warn!(
            "🔇 Sin conexión de voz en guild {}, descartando {}",
            state.guild_id(),
            entry.title()
        );
        return;
    };

    let completion = state.completion();
    let ticket = completion.arm();

    let handle = match voice.play(&artifact, state.gain(), ticket).await {
        Ok(handle) => handle,
        Err(e) => {
            // Un fallo del pipeline cuenta como fin de canción
            error!("❌ No se pudo reproducir {}: {}", entry.title(), e);
            return;
        }
    };

    state.reset_votes();
    entry.mark_started();
    state.set_now_playing(NowPlaying {
        entry: entry.clone(),
        handle,
    });
    state.set_phase(WorkerPhase::Playing);
    info!("🎵 Reproduciendo: {} en guild {}", entry.title(), state.guild_id());

    completion.wait().await;
    debug!("Track terminado, avanzando la cola de guild {}", state.guild_id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            guild::GuildSettings,
            queue::tests::{entry, requester},
            skip_votes::VoteResult,
        },
        voice::fake::{FakePlatform, VoiceEvent},
    };
    use serenity::model::id::{ChannelId, GuildId, UserId};
    use std::{path::Path, time::Duration};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn settings() -> GuildSettings {
        GuildSettings {
            capacity: 10,
            default_volume: 50,
            staging_timeout: Some(Duration::from_secs(5)),
        }
    }

    fn staged(dir: &Path, user: u64, title: &str) -> (Arc<QueueEntry>, PathBuf) {
        let path = dir.join(format!("{}.opus", title));
        std::fs::write(&path, b"audio").unwrap();
        let entry = entry(user, title, 120);
        entry.finish_staging(Ok(path.clone()));
        (entry, path)
    }

    async fn next_played(events: &mut UnboundedReceiver<VoiceEvent>) -> PathBuf {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(VoiceEvent::Played { artifact, .. })) => return artifact,
                Ok(Some(_)) => continue,
                other => panic!("no track started: {:?}", other),
            }
        }
    }

    async fn guild_with_voice() -> (Arc<GuildMusicState>, Arc<FakePlatform>, UnboundedReceiver<VoiceEvent>) {
        let (platform, events) = FakePlatform::new();
        let state = GuildMusicState::spawn(GuildId::new(1), &settings());
        state
            .attach_voice(platform.connection(ChannelId::new(7)))
            .await
            .unwrap();
        (state, platform, events)
    }

    #[test]
    fn stale_ticket_does_not_wake() {
        let signal = CompletionSignal::new();
        let old = signal.arm();
        let current = signal.arm();

        old.signal();
        assert!(!signal.slot.lock().fired);

        current.signal();
        current.signal();
        assert!(signal.slot.lock().fired);
    }

    #[tokio::test]
    async fn plays_entries_in_order_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;

        let (first, first_path) = staged(dir.path(), 1, "first");
        let (second, second_path) = staged(dir.path(), 2, "second");
        state.queue().enqueue(first).unwrap();
        state.queue().enqueue(second).unwrap();

        assert_eq!(next_played(&mut events).await, first_path);
        assert!(state.skip());

        assert_eq!(next_played(&mut events).await, second_path);
        assert!(!first_path.exists());
        assert_eq!(state.current().unwrap().title(), "second");

        state.teardown().await;
        assert!(!second_path.exists());
    }

    #[tokio::test]
    async fn waits_for_staging_before_playing() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;

        let pending = entry(1, "slow", 60);
        state.queue().enqueue(pending.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state.phase(), WorkerPhase::StagingWait);

        let path = dir.path().join("slow.opus");
        std::fs::write(&path, b"audio").unwrap();
        pending.finish_staging(Ok(path.clone()));

        assert_eq!(next_played(&mut events).await, path);
        state.teardown().await;
    }

    #[tokio::test]
    async fn failed_staging_moves_on() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;

        let broken = entry(1, "broken", 60);
        broken.finish_staging(Err("video unavailable".into()));
        let (good, good_path) = staged(dir.path(), 2, "good");
        state.queue().enqueue(broken).unwrap();
        state.queue().enqueue(good).unwrap();

        assert_eq!(next_played(&mut events).await, good_path);
        state.teardown().await;
    }

    #[tokio::test]
    async fn pipeline_error_counts_as_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (state, platform, mut events) = guild_with_voice().await;

        platform.fail_play(true);
        let (doomed, doomed_path) = staged(dir.path(), 1, "doomed");
        state.queue().enqueue(doomed).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!doomed_path.exists());
        assert_eq!(state.phase(), WorkerPhase::WaitingForEntry);

        platform.fail_play(false);
        let (next, next_path) = staged(dir.path(), 1, "next");
        state.queue().enqueue(next).unwrap();
        assert_eq!(next_played(&mut events).await, next_path);

        state.teardown().await;
    }

    #[tokio::test]
    async fn cancelling_mid_playback_releases_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;

        let (song, path) = staged(dir.path(), 1, "song");
        state.queue().enqueue(song).unwrap();
        next_played(&mut events).await;
        assert_eq!(state.phase(), WorkerPhase::Playing);

        state.teardown().await;

        assert!(!path.exists());
        assert!(state.current().is_none());
        let mut saw_stop = false;
        while let Ok(event) = events.try_recv() {
            saw_stop |= event == VoiceEvent::Stopped;
        }
        assert!(saw_stop);
    }

    #[tokio::test]
    async fn votes_reset_when_next_track_starts() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;
        state.on_membership_changed(8);

        let (first, _) = staged(dir.path(), 1, "first");
        let (second, _) = staged(dir.path(), 1, "second");
        state.queue().enqueue(first).unwrap();
        state.queue().enqueue(second).unwrap();
        next_played(&mut events).await;

        state.register_skip_vote(UserId::new(5)).unwrap();
        assert_eq!(state.vote_tally(), (1, 3));

        // El solicitante salta sin votar
        assert!(state.register_skip_vote(requester(1).user_id).unwrap().skips());
        next_played(&mut events).await;
        assert_eq!(state.vote_tally(), (0, 3));

        state.teardown().await;
    }

    #[tokio::test]
    async fn skip_vote_stops_only_once_the_quota_is_met() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _platform, mut events) = guild_with_voice().await;
        state.on_membership_changed(5);

        let (first, first_path) = staged(dir.path(), 1, "first");
        let (second, second_path) = staged(dir.path(), 1, "second");
        state.queue().enqueue(first).unwrap();
        state.queue().enqueue(second).unwrap();
        assert_eq!(next_played(&mut events).await, first_path);

        assert_eq!(
            state.register_skip_vote(UserId::new(5)),
            Ok(VoteResult::VoteRecorded {
                current: 1,
                required: 2
            })
        );
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
        assert_eq!(state.current().unwrap().title(), "first");

        assert_eq!(
            state.register_skip_vote(UserId::new(6)),
            Ok(VoteResult::ThresholdReached)
        );
        assert_eq!(events.recv().await, Some(VoiceEvent::Stopped));
        assert_eq!(next_played(&mut events).await, second_path);
        assert_eq!(state.vote_tally(), (0, 2));

        state.teardown().await;
    }
}
