use serenity::model::id::UserId;
use std::collections::HashSet;
use tracing::debug;

/// Outcome of one skip request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    /// The requester of the current track skipped it; no vote was counted
    Forced,
    AlreadyVoted,
    VoteRecorded { current: usize, required: usize },
    ThresholdReached,
}

impl VoteResult {
    /// Whether the current track should be stopped.
    pub fn skips(&self) -> bool {
        matches!(self, Self::Forced | Self::ThresholdReached)
    }
}

/// Distinct skip voters for the track currently playing.
#[derive(Debug)]
pub struct SkipVoteTracker {
    voters: HashSet<UserId>,
    required: usize,
}

impl Default for SkipVoteTracker {
    fn default() -> Self {
        // Hasta conocer la ocupación del canal basta con un voto
        Self {
            voters: HashSet::new(),
            required: 1,
        }
    }
}

impl SkipVoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Votes needed for `member_count` users in the bot's channel (bot included).
    pub fn quota_for(member_count: usize) -> usize {
        (member_count + 1).div_ceil(3)
    }

    pub fn on_membership_changed(&mut self, member_count: usize) {
        self.required = Self::quota_for(member_count);
        debug!(
            "👥 {} miembros en el canal, {} votos para saltar",
            member_count, self.required
        );
    }

    pub fn register_vote(&mut self, voter: UserId, is_original_requester: bool) -> VoteResult {
        if is_original_requester {
            return VoteResult::Forced;
        }

        if !self.voters.insert(voter) {
            return VoteResult::AlreadyVoted;
        }

        let current = self.voters.len();
        if current >= self.required {
            VoteResult::ThresholdReached
        } else {
            VoteResult::VoteRecorded {
                current,
                required: self.required,
            }
        }
    }

    pub fn reset(&mut self) {
        self.voters.clear();
    }

    pub fn votes(&self) -> usize {
        self.voters.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }
}
