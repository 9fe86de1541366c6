use parking_lot::Mutex;
use serenity::model::id::{ChannelId, UserId};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{watch, Notify},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    error::{MusicError, Result},
    sources::ResolvedTrack,
};

/// Who asked for a song, and where they were when they asked.
#[derive(Debug, Clone)]
pub struct Requester {
    pub user_id: UserId,
    pub name: String,
    /// Voice channel the user is connected to, if any
    pub voice_channel: Option<ChannelId>,
}

/// Progress of turning an entry into a local artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum StagingState {
    Pending,
    Ready(PathBuf),
    Failed(String),
}

/// One requested track.
///
/// Requester, query and metadata are fixed at creation. Only the staged
/// artifact and the playback start instant are filled in later; the entry is
/// playable once the artifact is present.
#[derive(Debug)]
pub struct QueueEntry {
    requester: UserId,
    requester_name: String,
    query: String,
    track: ResolvedTrack,
    staging: watch::Sender<StagingState>,
    started_at: Mutex<Option<Instant>>,
}

impl QueueEntry {
    pub fn new(requester: &Requester, query: impl Into<String>, track: ResolvedTrack) -> Self {
        let (staging, _) = watch::channel(StagingState::Pending);
        Self {
            requester: requester.user_id,
            requester_name: requester.name.clone(),
            query: query.into(),
            track,
            staging,
            started_at: Mutex::new(None),
        }
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn requester_name(&self) -> &str {
        &self.requester_name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }

    pub fn duration(&self) -> Option<Duration> {
        self.track.duration
    }

    pub fn track(&self) -> &ResolvedTrack {
        &self.track
    }

    pub fn artifact(&self) -> Option<PathBuf> {
        match &*self.staging.borrow() {
            StagingState::Ready(path) => Some(path.clone()),
            _ => None,
        }
    }

    pub fn is_playable(&self) -> bool {
        self.artifact().is_some()
    }

    /// Records the staging result. A result arriving after the entry was
    /// released is discarded, deleting the late artifact.
    pub fn finish_staging(&self, result: std::result::Result<PathBuf, String>) -> bool {
        let mut late_artifact = None;
        let accepted = self.staging.send_if_modified(|state| {
            if *state != StagingState::Pending {
                if let Ok(path) = &result {
                    late_artifact = Some(path.clone());
                }
                return false;
            }
            *state = match &result {
                Ok(path) => StagingState::Ready(path.clone()),
                Err(message) => StagingState::Failed(message.clone()),
            };
            true
        });

        if let Some(path) = late_artifact {
            debug!("🗑️ Descarga tardía descartada: {}", path.display());
            remove_artifact(&path);
        }
        accepted
    }

    /// Gives up on the entry: deletes a staged artifact and makes any staging
    /// still in flight discard its result.
    pub fn release(&self) {
        let previous = self
            .staging
            .send_replace(StagingState::Failed("released".into()));
        if let StagingState::Ready(path) = previous {
            remove_artifact(&path);
        }
    }

    /// Suspends until staging finishes, fails, or `timeout` elapses.
    ///
    /// `None` waits indefinitely.
    pub async fn wait_staged(&self, timeout: Option<Duration>) -> Result<PathBuf> {
        let mut rx = self.staging.subscribe();
        let wait = async {
            rx.wait_for(|state| *state != StagingState::Pending)
                .await
                .map(|state| state.clone())
                .map_err(|_| MusicError::Cancelled)
        };

        let state = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| MusicError::StagingTimeout(limit))??,
            None => wait.await?,
        };

        match state {
            StagingState::Ready(path) => Ok(path),
            StagingState::Failed(message) => Err(MusicError::StagingFailed(message)),
            StagingState::Pending => Err(MusicError::Cancelled),
        }
    }

    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    /// Time played so far; zero before playback starts.
    pub fn elapsed(&self) -> Duration {
        self.started_at()
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Time left; the full length before playback starts, zero if unknown.
    pub fn remaining(&self) -> Duration {
        self.duration()
            .unwrap_or_default()
            .saturating_sub(self.elapsed())
    }
}

/// Deletes a staged artifact; a file that is already gone is not an error.
pub fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("🗑️ Artefacto eliminado: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("No se pudo eliminar {}: {}", path.display(), e),
    }
}

/// Bounded FIFO of entries waiting to play.
///
/// Safe for concurrent producers; [`PlaybackQueue::dequeue`] is meant for the
/// guild's single audio worker.
#[derive(Debug)]
pub struct PlaybackQueue {
    entries: Mutex<Entries>,
    capacity: usize,
    available: Notify,
}

#[derive(Debug)]
struct Entries {
    waiting: VecDeque<Arc<QueueEntry>>,
    /// Set by [`PlaybackQueue::close`]; no entry is accepted afterwards
    closed: bool,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                waiting: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
        }
    }

    /// Appends an entry, returning its 1-based position.
    ///
    /// Fails with [`MusicError::Cancelled`] once the queue is closed.
    pub fn enqueue(&self, entry: Arc<QueueEntry>) -> Result<usize> {
        let position = {
            let mut entries = self.entries.lock();
            if entries.closed {
                return Err(MusicError::Cancelled);
            }
            if entries.waiting.len() >= self.capacity {
                return Err(MusicError::QueueFull {
                    capacity: self.capacity,
                });
            }
            debug!("➕ Agregado a la cola: {}", entry.title());
            entries.waiting.push_back(entry);
            entries.waiting.len()
        };

        self.available.notify_one();
        Ok(position)
    }

    /// Removes and returns the oldest entry, waiting for one if empty.
    pub async fn dequeue(&self) -> Arc<QueueEntry> {
        loop {
            if let Some(entry) = self.entries.lock().waiting.pop_front() {
                debug!("➡️ Siguiente en cola (FIFO): {}", entry.title());
                return entry;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().waiting.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().closed
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the waiting entries in play order.
    pub fn snapshot(&self) -> Vec<Arc<QueueEntry>> {
        self.entries.lock().waiting.iter().cloned().collect()
    }

    /// Empties the queue for good, handing back what was waiting.
    pub fn close(&self) -> Vec<Arc<QueueEntry>> {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock();
            entries.closed = true;
            entries.waiting.drain(..).collect()
        };
        if !drained.is_empty() {
            info!("🗑️ Cola limpiada: {} canciones removidas", drained.len());
        }
        drained
    }
}

/// Estimated wait until a user's next entry starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// The user's entry is the very next one
    NextUp,
    Wait(Duration),
    NotQueued,
}

/// Sums the current track's remaining time and the lengths of every entry
/// ahead of the first one requested by `user`.
///
/// When nothing ahead adds to the wait (only entries of unknown length) the
/// user is reported as next up.
pub fn estimate_wait(current_remaining: Duration, queued: &[Arc<QueueEntry>], user: UserId) -> Eta {
    let mut total = current_remaining;
    for entry in queued {
        if entry.requester() == user {
            return if total == current_remaining {
                Eta::NextUp
            } else {
                Eta::Wait(total)
            };
        }
        total += entry.duration().unwrap_or_default();
    }
    Eta::NotQueued
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn requester(id: u64) -> Requester {
        Requester {
            user_id: UserId::new(id),
            name: format!("user{}", id),
            voice_channel: None,
        }
    }

    pub fn entry(user: u64, title: &str, secs: u64) -> Arc<QueueEntry> {
        Arc::new(QueueEntry::new(
            &requester(user),
            title,
            ResolvedTrack {
                title: title.to_string(),
                duration: Some(Duration::from_secs(secs)),
                url: format!("https://example.com/{}", title),
            },
        ))
    }

    #[test]
    fn rejects_entries_beyond_capacity() {
        for capacity in [1, 3, 10] {
            let queue = PlaybackQueue::new(capacity);
            for i in 0..capacity {
                assert_eq!(queue.enqueue(entry(1, "song", 10)).unwrap(), i + 1);
            }

            let err = queue.enqueue(entry(1, "extra", 10)).unwrap_err();
            assert_eq!(err, MusicError::QueueFull { capacity });
            assert_eq!(queue.len(), capacity);
            assert!(queue.is_full());
        }
    }

    #[tokio::test]
    async fn dequeues_in_enqueue_order() {
        let queue = PlaybackQueue::new(10);
        for title in ["a", "b", "c", "d"] {
            queue.enqueue(entry(1, title, 10)).unwrap();
        }

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(queue.dequeue().await.title().to_string());
        }
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dequeue_waits_for_an_entry() {
        let queue = Arc::new(PlaybackQueue::new(5));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());

        queue.enqueue(entry(1, "late", 10)).unwrap();
        let got = consumer.await.unwrap();
        assert_eq!(got.title(), "late");
    }

    #[test]
    fn snapshot_leaves_queue_untouched() {
        let queue = PlaybackQueue::new(5);
        queue.enqueue(entry(1, "a", 10)).unwrap();
        queue.enqueue(entry(2, "b", 10)).unwrap();

        let titles: Vec<_> = queue.snapshot().iter().map(|e| e.title().to_string()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn eta_counts_entries_ahead_of_the_user() {
        let remaining = Duration::from_secs(30);
        let queued = vec![entry(10, "A", 40), entry(20, "B", 20)];

        assert_eq!(
            estimate_wait(remaining, &queued, UserId::new(20)),
            Eta::Wait(Duration::from_secs(70))
        );
        assert_eq!(estimate_wait(remaining, &queued, UserId::new(10)), Eta::NextUp);
        assert_eq!(estimate_wait(remaining, &queued, UserId::new(30)), Eta::NotQueued);
    }

    #[test]
    fn eta_ignores_entries_of_unknown_length() {
        let remaining = Duration::from_secs(30);
        let live = Arc::new(QueueEntry::new(
            &requester(10),
            "radio",
            ResolvedTrack {
                title: "radio".to_string(),
                duration: None,
                url: "https://example.com/radio".to_string(),
            },
        ));
        let queued = vec![live, entry(20, "B", 20), entry(30, "C", 10)];

        assert_eq!(estimate_wait(remaining, &queued, UserId::new(20)), Eta::NextUp);
        assert_eq!(
            estimate_wait(remaining, &queued, UserId::new(30)),
            Eta::Wait(Duration::from_secs(50))
        );
    }

    #[test]
    fn closed_queue_refuses_entries() {
        let queue = PlaybackQueue::new(5);
        queue.enqueue(entry(1, "a", 10)).unwrap();

        let drained = queue.close();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(entry(1, "b", 10)), Err(MusicError::Cancelled));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn staging_result_wakes_waiter() {
        let entry = entry(1, "a", 10);
        assert!(!entry.is_playable());

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.wait_staged(None).await })
        };

        assert!(entry.finish_staging(Ok(PathBuf::from("/tmp/a.opus"))));
        assert_eq!(waiter.await.unwrap(), Ok(PathBuf::from("/tmp/a.opus")));
        assert!(entry.is_playable());
    }

    #[tokio::test]
    async fn staging_failure_is_reported() {
        let entry = entry(1, "a", 10);
        entry.finish_staging(Err("video unavailable".into()));

        assert_eq!(
            entry.wait_staged(None).await,
            Err(MusicError::StagingFailed("video unavailable".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn staging_wait_times_out() {
        let entry = entry(1, "a", 10);
        let limit = Duration::from_secs(60);

        assert_eq!(
            entry.wait_staged(Some(limit)).await,
            Err(MusicError::StagingTimeout(limit))
        );
    }

    #[test]
    fn late_artifact_is_deleted_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.opus");
        std::fs::write(&path, b"audio").unwrap();

        let entry = entry(1, "a", 10);
        entry.release();

        assert!(!entry.finish_staging(Ok(path.clone())));
        assert!(!path.exists());
    }

    #[test]
    fn release_deletes_staged_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ready.opus");
        std::fs::write(&path, b"audio").unwrap();

        let entry = entry(1, "a", 10);
        entry.finish_staging(Ok(path.clone()));
        entry.release();

        assert!(!path.exists());
        assert!(!entry.is_playable());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down_once_started() {
        let entry = entry(1, "a", 100);
        assert_eq!(entry.remaining(), Duration::from_secs(100));

        entry.mark_started();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(entry.remaining(), Duration::from_secs(70));
    }
}
