//! # Sources Module
//!
//! Media resolution for song requests.
//!
//! The playback core never talks to a video site directly; it goes through a
//! [`MediaResolver`]. A resolver answers three questions:
//!
//! - **resolve**: is this query a direct link to one playable item, and what
//!   are its title and length?
//! - **search**: which candidate links match a bare search term?
//! - **stage**: download/decode a resolved item into a local artifact the
//!   voice pipeline can play.
//!
//! Link-versus-search is an explicit [`ResolveOutcome`] variant instead of an
//! error, so callers branch on it directly.

pub mod ytdlp;

use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::MusicError;

pub use ytdlp::YtDlpResolver;

/// Metadata of one directly playable item.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub title: String,
    pub duration: Option<Duration>,
    /// Canonical page URL, handed back to [`MediaResolver::stage`]
    pub url: String,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub title: String,
    pub url: String,
}

/// Result of resolving a query in metadata-only mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// The query points at a single playable item
    Direct(ResolvedTrack),
    /// The query is not a link; search for it instead
    SearchNeeded,
    /// A link to something that can't be played as one track (playlist, live stream)
    Unsupported,
    /// The extractor rejected the query; the message is user-presentable
    Failed(String),
}

/// External collaborator that turns queries into playable audio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolves metadata without downloading.
    async fn resolve(&self, query: &str) -> ResolveOutcome;

    /// Provider search for a bare term, best match first.
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>, MusicError>;

    /// Downloads `track` into `dir`, returning the artifact path.
    ///
    /// Must return [`MusicError::Cancelled`] promptly once `cancel` fires.
    async fn stage(
        &self,
        track: &ResolvedTrack,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MusicError>;
}

/// Returns the link `query` points at, or `None` for search text.
///
/// Scheme-less links such as `youtu.be/abc` are accepted as https.
pub fn as_link(query: &str) -> Option<Url> {
    let query = query.trim();
    if query.is_empty() || query.contains(char::is_whitespace) {
        return None;
    }

    if let Ok(url) = Url::parse(query) {
        return matches!(url.scheme(), "http" | "https").then_some(url);
    }

    let (host, _) = query.split_once('/')?;
    if !host.contains('.') {
        return None;
    }
    Url::parse(&format!("https://{}", query)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_links_and_search_terms() {
        assert!(as_link("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_some());
        assert!(as_link("youtu.be/dQw4w9WgXcQ").is_some());
        assert!(as_link("never gonna give you up").is_none());
        assert!(as_link("despacito").is_none());
        assert!(as_link("ftp://example.com/song.mp3").is_none());
    }
}
