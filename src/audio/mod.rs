//! # Audio Module
//!
//! Per-guild playback core of the bot.
//!
//! ## Architecture
//!
//! ### [`queue`] - Playback Queue
//! - Bounded FIFO of [`queue::QueueEntry`] with a suspending dequeue
//! - Staging state of each entry and ETA estimation
//!
//! ### [`worker`] - Audio Worker
//! - One task per guild: dequeue, wait for staging, play, wait for completion
//! - Artifact cleanup that survives task cancellation
//!
//! ### [`skip_votes`] - Skip Votes
//! - Distinct voters for the current track and the occupancy-based quota
//!
//! ### [`guild`] - Guild State
//! - Queue, current track, voice connection, volume and votes of one guild
//!
//! ### [`service`] - Music Service
//! - Guild registry and the operations behind each chat command
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let service = MusicService::new(platform, resolver, settings);
//!
//! let queued = service.enqueue_song(guild_id, "never gonna give you up", &requester).await?;
//! service.set_volume(guild_id, 80)?;
//! service.request_skip(guild_id, voter)?;
//! service.teardown(guild_id).await;
//! ```

pub mod guild;
pub mod queue;
pub mod service;
pub mod skip_votes;
pub mod worker;
