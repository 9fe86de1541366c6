//! User-facing text for command replies.

use std::time::Duration;

use crate::{
    audio::{
        queue::{Eta, QueueEntry},
        service::{Enqueued, NowPlayingStatus},
        skip_votes::VoteResult,
    },
    error::MusicError,
};

/// Discord's message length limit
pub const MESSAGE_LIMIT: usize = 2000;

/// Opening and closing fence around the queue listing
const CODE_FENCES: &str = "```\n\n```";

/// `"{m}m {s}s"`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// `**title** requested by **name** [length: Xm Ys]`
pub fn describe_entry(entry: &QueueEntry) -> String {
    let mut text = format!(
        "**{}** requested by **{}**",
        entry.title(),
        entry.requester_name()
    );
    if let Some(duration) = entry.duration() {
        text.push_str(&format!(" [length: {}]", format_duration(duration)));
    }
    text
}

pub fn enqueued(queued: &Enqueued) -> String {
    format!(
        "🎵 Enqueued {} (position {})",
        describe_entry(&queued.entry),
        queued.position
    )
}

pub fn now_playing(status: Option<&NowPlayingStatus>) -> String {
    match status {
        Some(status) => format!(
            "Now playing {} [skips: {}/{}]",
            describe_entry(&status.entry),
            status.votes,
            status.required
        ),
        None => "Not playing anything.".to_string(),
    }
}

pub fn progress(elapsed: Duration, length: Duration) -> String {
    format!("{}/{}", format_duration(elapsed), format_duration(length))
}

pub fn eta(eta: Eta) -> String {
    match eta {
        Eta::NextUp => "⏭️ You're up next!".to_string(),
        Eta::Wait(wait) => format!("⏳ Your song plays in about {}", format_duration(wait)),
        Eta::NotQueued => "You have no songs in the queue.".to_string(),
    }
}

pub fn queue_listing(entries: &[std::sync::Arc<QueueEntry>]) -> String {
    if entries.is_empty() {
        return "The queue is empty.".to_string();
    }

    let listing = entries
        .iter()
        .map(|entry| describe_entry(entry))
        .collect::<Vec<_>>()
        .join("\n\n");
    let listing = truncate_to(&listing, MESSAGE_LIMIT - CODE_FENCES.len());
    format!("```\n{}\n```", listing)
}

pub fn queue_length(length: usize) -> String {
    match length {
        1 => "There is 1 song in the queue.".to_string(),
        n => format!("There are {} songs in the queue.", n),
    }
}

pub fn vote(result: VoteResult) -> String {
    match result {
        VoteResult::Forced => "⏭️ Requester skipped the song.".to_string(),
        VoteResult::ThresholdReached => "⏭️ Skip vote passed, skipping song...".to_string(),
        VoteResult::AlreadyVoted => "You have already voted to skip this song.".to_string(),
        VoteResult::VoteRecorded { current, required } => {
            format!("🗳️ Skip vote added, currently at [{}/{}]", current, required)
        }
    }
}

pub fn volume(percent: u32, live: bool) -> String {
    if live {
        format!("🔊 Set the volume to {}%", percent)
    } else {
        format!("🔊 Volume set to {}%, it applies to the next song", percent)
    }
}

/// Reply text for a failed command.
pub fn error(err: &MusicError) -> String {
    let text = match err {
        MusicError::QueueFull { capacity } => {
            format!("❌ The queue is full ({} songs), try again later.", capacity)
        }
        MusicError::NotInVoiceChannel => "❌ You are not in a voice channel.".to_string(),
        MusicError::NotInBotChannel => {
            "❌ You need to be in the bot's voice channel to add songs.".to_string()
        }
        MusicError::ExtractionFailed(message) => {
            format!("❌ An error occurred while processing this request: {}", message)
        }
        MusicError::NoResults(query) => format!("❌ No results for `{}`.", query),
        MusicError::UnsupportedMedia => {
            "❌ Playlists and live streams can't be queued, link a single song.".to_string()
        }
        MusicError::BlockedSource(host) => format!("❌ Links to {} are not supported.", host),
        MusicError::OutOfRange(_) => "❌ Volume must be between 0 and 200.".to_string(),
        MusicError::NotPlaying => "Not playing anything.".to_string(),
        MusicError::Connection(reason) => {
            format!("❌ Could not connect to the voice channel: {}", reason)
        }
        MusicError::Cancelled => "⏹️ Playback was stopped before the song was queued.".to_string(),
        other => format!("❌ {}", other),
    };
    truncate(&text)
}

/// Cuts `text` to the message limit, ending in `...` when shortened.
pub fn truncate(text: &str) -> String {
    truncate_to(text, MESSAGE_LIMIT)
}

fn truncate_to(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit - 4).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::tests::entry;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations_render_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0m 0s");
        assert_eq!(format_duration(Duration::from_secs(212)), "3m 32s");
        assert_eq!(
            progress(Duration::from_secs(65), Duration::from_secs(212)),
            "1m 5s/3m 32s"
        );
    }

    #[test]
    fn status_line_includes_vote_tally() {
        let status = NowPlayingStatus {
            entry: entry(1, "Song", 90),
            votes: 1,
            required: 3,
        };
        assert_eq!(
            now_playing(Some(&status)),
            "Now playing **Song** requested by **user1** [length: 1m 30s] [skips: 1/3]"
        );
        assert_eq!(now_playing(None), "Not playing anything.");
    }

    #[test]
    fn queue_is_listed_in_a_code_block() {
        let listing = queue_listing(&[entry(1, "A", 40), entry(2, "B", 20)]);
        assert_eq!(
            listing,
            "```\n**A** requested by **user1** [length: 0m 40s]\n\n**B** requested by **user2** [length: 0m 20s]\n```"
        );
        assert_eq!(queue_listing(&[]), "The queue is empty.");
    }

    #[test]
    fn long_queue_listing_keeps_its_fences() {
        let entries: Vec<_> = (1..=40)
            .map(|i| entry(i, &format!("song {} {}", i, "x".repeat(60)), 200))
            .collect();
        let listing = queue_listing(&entries);

        assert!(listing.chars().count() <= MESSAGE_LIMIT);
        assert!(listing.starts_with("```\n**"));
        assert!(listing.ends_with("...\n```"));
    }

    #[test]
    fn eta_messages() {
        assert_eq!(eta(Eta::Wait(Duration::from_secs(70))), "⏳ Your song plays in about 1m 10s");
        assert_eq!(eta(Eta::NextUp), "⏭️ You're up next!");
    }

    #[test]
    fn long_upstream_errors_are_truncated() {
        let err = MusicError::ExtractionFailed("x".repeat(5000));
        let text = error(&err);

        assert_eq!(text.chars().count(), 1999);
        assert!(text.ends_with("x..."));
        assert_eq!(truncate("short"), "short");
    }
}
