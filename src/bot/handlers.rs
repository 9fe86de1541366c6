use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::{messages, MusicBot};
use crate::{
    audio::{queue::Requester, service::MusicService},
    error::MusicError,
};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `None` joins the requester's channel
    Join(Option<ChannelId>),
    Summon,
    Play(String),
    /// `None` reports the stored volume
    Volume(Option<i64>),
    Pause,
    Resume,
    Stop,
    Skip,
    ModSkip,
    Progress,
    Eta,
    Queue,
    QueueLength,
    Playing,
}

impl Action {
    pub fn from_command(command: &CommandInteraction) -> Option<Self> {
        let option = |name: &str| {
            command
                .data
                .options
                .iter()
                .find(|opt| opt.name == name)
                .map(|opt| &opt.value)
        };

        let action = match command.data.name.as_str() {
            "join" => Self::Join(option("channel").and_then(|value| value.as_channel_id())),
            "summon" => Self::Summon,
            "play" => Self::Play(option("query")?.as_str()?.to_string()),
            "volume" => Self::Volume(option("percent").and_then(|value| value.as_i64())),
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "skip" => Self::Skip,
            "modskip" => Self::ModSkip,
            "progress" => Self::Progress,
            "eta" => Self::Eta,
            "queue" => Self::Queue,
            "queuelength" => Self::QueueLength,
            "playing" => Self::Playing,
            _ => return None,
        };
        Some(action)
    }

    /// Actions that may connect to voice or call the resolver, and so
    /// answer through a deferred response.
    fn is_slow(&self) -> bool {
        matches!(self, Self::Join(_) | Self::Summon | Self::Play(_))
    }
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &MusicBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let Some(action) = Action::from_command(&command) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Unknown command")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    let requester = Requester {
        user_id: command.user.id,
        name: command
            .member
            .as_ref()
            .map(|member| member.display_name().to_string())
            .unwrap_or_else(|| command.user.name.clone()),
        voice_channel: super::user_voice_channel(ctx, guild_id, command.user.id),
    };

    let deferred = action.is_slow();
    if deferred {
        // Defer la respuesta ya que puede tomar tiempo
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
    }

    let result = run(&bot.service, guild_id, &requester, action).await;
    if deferred {
        bot.refresh_vote_quota(ctx, guild_id);
    }

    let (content, ephemeral) = match result {
        Ok(text) => (text, false),
        Err(e) => {
            warn!("⚠️ /{} falló en guild {}: {}", command.data.name, guild_id, e);
            (messages::error(&e), true)
        }
    };

    if deferred {
        command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
            .await?;
    } else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(content)
                        .ephemeral(ephemeral),
                ),
            )
            .await?;
    }

    Ok(())
}

/// Runs one command against the music service and returns the reply text.
pub async fn run(
    service: &MusicService,
    guild_id: GuildId,
    requester: &Requester,
    action: Action,
) -> Result<String, MusicError> {
    let reply = match action {
        Action::Join(Some(channel_id)) => {
            service.join_channel(guild_id, channel_id).await?;
            format!("🔊 Ready to play audio in <#{}>", channel_id)
        }
        Action::Join(None) | Action::Summon => {
            let channel_id = service.summon(guild_id, requester).await?;
            format!("🔊 Ready to play audio in <#{}>", channel_id)
        }
        Action::Play(query) => {
            let queued = service.enqueue_song(guild_id, &query, requester).await?;
            messages::enqueued(&queued)
        }
        Action::Volume(None) => format!("🔊 Volume is {}%", service.volume(guild_id)),
        Action::Volume(Some(level)) => {
            let percent = u32::try_from(level).unwrap_or(u32::MAX);
            let live = service.set_volume(guild_id, percent)?;
            messages::volume(percent, live)
        }
        Action::Pause => {
            service.pause(guild_id)?;
            "⏸️ Paused".to_string()
        }
        Action::Resume => {
            service.resume(guild_id)?;
            "▶️ Resumed".to_string()
        }
        Action::Stop => {
            if service.teardown(guild_id).await {
                "⏹️ Stopped, cleared the queue and left the channel".to_string()
            } else {
                return Err(MusicError::NotPlaying);
            }
        }
        Action::Skip => messages::vote(service.request_skip(guild_id, requester.user_id)?),
        Action::ModSkip => {
            service.force_skip(guild_id)?;
            "⏭️ Skipped".to_string()
        }
        Action::Progress => {
            let (elapsed, length) = service.progress(guild_id)?;
            messages::progress(elapsed, length)
        }
        Action::Eta => messages::eta(service.compute_eta(guild_id, requester.user_id)?),
        Action::Queue => messages::queue_listing(&service.queue_snapshot(guild_id)),
        Action::QueueLength => messages::queue_length(service.queue_length(guild_id)),
        Action::Playing => messages::now_playing(service.now_playing(guild_id).as_ref()),
    };
    Ok(reply)
}
