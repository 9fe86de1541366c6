use async_process::{Command, Stdio};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{as_link, MediaResolver, ResolveOutcome, ResolvedTrack, SearchCandidate};
use crate::error::MusicError;

/// Candidates requested per search; only the first is used
const SEARCH_LIMIT: usize = 5;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi regex"));

/// Resolver backed by the `yt-dlp` executable.
pub struct YtDlpResolver {
    binary: String,
    // Limitar procesos concurrentes de yt-dlp para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Subset of the `--dump-single-json` document we care about
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Checks that the executable is callable; used at startup.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn dump_json(&self, target: &str) -> Result<YtDlpInfo, MusicError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| MusicError::Cancelled)?;

        debug!("📊 Obteniendo info de: {}", target);

        let output = Command::new(&self.binary)
            .args([
                "--dump-single-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                target,
            ])
            .output()
            .await
            .map_err(|e| MusicError::ExtractionFailed(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MusicError::ExtractionFailed(clean_error(&stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| MusicError::ExtractionFailed(format!("unreadable yt-dlp output: {}", e)))
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> ResolveOutcome {
        let Some(url) = as_link(query) else {
            return ResolveOutcome::SearchNeeded;
        };

        match self.dump_json(url.as_str()).await {
            Ok(info) => info_to_outcome(info, url.as_str()),
            Err(MusicError::ExtractionFailed(message)) => ResolveOutcome::Failed(message),
            Err(e) => ResolveOutcome::Failed(e.to_string()),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, MusicError> {
        info!("🔍 Buscando: {}", query);
        let info = self
            .dump_json(&format!("ytsearch{}:{}", SEARCH_LIMIT, query))
            .await?;

        Ok(info.entries.into_iter().filter_map(info_to_candidate).collect())
    }

    async fn stage(
        &self,
        track: &ResolvedTrack,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MusicError> {
        let template = dir.join(format!("{:016x}.%(ext)s", fastrand::u64(..)));

        let mut command = Command::new(&self.binary);
        command
            .args(["-f", "bestaudio/best", "--no-playlist", "--no-warnings", "--no-progress"])
            .args(["--print", "after_move:filepath", "-o"])
            .arg(&template)
            .arg(&track.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("⬇️ Descargando {} en {}", track.url, dir.display());

        let output = tokio::select! {
            output = command.output() => output
                .map_err(|e| MusicError::StagingFailed(format!("could not run yt-dlp: {}", e)))?,
            _ = cancel.cancelled() => {
                // kill_on_drop termina el proceso al soltar el futuro
                return Err(MusicError::Cancelled);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MusicError::StagingFailed(clean_error(&stderr)));
        }

        let path = String::from_utf8_lossy(&output.stdout)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| PathBuf::from(line.trim()))
            .ok_or_else(|| MusicError::StagingFailed("yt-dlp did not report a file".into()))?;

        info!("✅ Descarga completada: {}", path.display());
        Ok(path)
    }
}

fn info_to_outcome(info: YtDlpInfo, requested: &str) -> ResolveOutcome {
    if info.kind.as_deref() == Some("playlist") || info.is_live.unwrap_or(false) {
        warn!("🚫 Enlace no reproducible como una sola canción: {}", requested);
        return ResolveOutcome::Unsupported;
    }

    let Some(title) = info.title else {
        return ResolveOutcome::Unsupported;
    };

    ResolveOutcome::Direct(ResolvedTrack {
        title,
        duration: info.duration.map(Duration::from_secs_f64),
        url: info.webpage_url.unwrap_or_else(|| requested.to_string()),
    })
}

fn info_to_candidate(entry: YtDlpInfo) -> Option<SearchCandidate> {
    let url = entry
        .webpage_url
        .or(entry.url)
        .or_else(|| entry.id.map(|id| format!("https://www.youtube.com/watch?v={}", id)))?;

    Some(SearchCandidate {
        title: entry.title.unwrap_or_default(),
        url,
    })
}

/// Reduces yt-dlp stderr to the human-readable part of its last `ERROR:` line.
pub fn clean_error(stderr: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(stderr, "");

    stripped
        .lines()
        .rev()
        .find_map(|line| line.split_once("ERROR:").map(|(_, rest)| rest.trim()))
        .filter(|rest| !rest.is_empty())
        .unwrap_or_else(|| stripped.trim())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn playlists_and_streams_are_unsupported() {
        let playlist: YtDlpInfo =
            serde_json::from_str(r#"{"_type": "playlist", "title": "Mix", "entries": []}"#).unwrap();
        assert_eq!(info_to_outcome(playlist, "https://x.test/p"), ResolveOutcome::Unsupported);

        let live: YtDlpInfo =
            serde_json::from_str(r#"{"title": "Radio", "is_live": true}"#).unwrap();
        assert_eq!(info_to_outcome(live, "https://x.test/l"), ResolveOutcome::Unsupported);
    }

    #[test]
    fn single_video_resolves_with_metadata() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"_type": "video", "id": "abc", "title": "Song", "duration": 212.0,
                "webpage_url": "https://www.youtube.com/watch?v=abc"}"#,
        )
        .unwrap();

        assert_eq!(
            info_to_outcome(info, "https://youtu.be/abc"),
            ResolveOutcome::Direct(ResolvedTrack {
                title: "Song".into(),
                duration: Some(Duration::from_secs(212)),
                url: "https://www.youtube.com/watch?v=abc".into(),
            })
        );
    }

    #[test]
    fn search_entries_fall_back_to_id_links() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"_type": "playlist", "entries": [{"id": "xyz", "title": "Hit"}]}"#,
        )
        .unwrap();

        let candidates: Vec<_> = info.entries.into_iter().filter_map(info_to_candidate).collect();
        assert_eq!(candidates[0].url, "https://www.youtube.com/watch?v=xyz");
    }

    #[test]
    fn extractor_errors_are_cleaned() {
        let stderr = "WARNING: something\n\x1b[0;31mERROR:\x1b[0m [youtube] abc: Video unavailable\n";
        assert_eq!(clean_error(stderr), "[youtube] abc: Video unavailable");
        assert_eq!(clean_error("  plain failure \n"), "plain failure");
    }
}
