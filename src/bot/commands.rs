use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::CommandOptionType, channel::ChannelType, id::GuildId,
        permissions::Permissions,
    },
    prelude::Context,
};

use crate::audio::guild::MAX_VOLUME;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        summon_command(),
        play_command(),
        volume_command(),
        pause_command(),
        resume_command(),
        stop_command(),
        skip_command(),
        modskip_command(),
        progress_command(),
        eta_command(),
        queue_command(),
        queuelength_command(),
        playing_command(),
    ]
}

/// Commands that change playback for everyone require KICK_MEMBERS.
fn privileged(command: CreateCommand) -> CreateCommand {
    command.default_member_permissions(Permissions::KICK_MEMBERS)
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join")
        .description("Joins a voice channel")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Channel, "channel", "Voice channel to join")
                .channel_types(vec![ChannelType::Voice]),
        )
}

fn summon_command() -> CreateCommand {
    CreateCommand::new("summon").description("Summons the bot to your voice channel")
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Plays a song from a link or a search")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Link or search terms")
                .required(true),
        )
}

fn volume_command() -> CreateCommand {
    privileged(
        CreateCommand::new("volume")
            .description("Shows or sets the playback volume")
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "percent", "Volume, 0-200")
                    .min_int_value(0)
                    .max_int_value(MAX_VOLUME.into()),
            ),
    )
}

fn pause_command() -> CreateCommand {
    privileged(CreateCommand::new("pause").description("Pauses the current song"))
}

fn resume_command() -> CreateCommand {
    privileged(CreateCommand::new("resume").description("Resumes the current song"))
}

fn stop_command() -> CreateCommand {
    privileged(
        CreateCommand::new("stop").description("Stops playing, clears the queue and leaves"),
    )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Votes to skip the current song")
}

fn modskip_command() -> CreateCommand {
    privileged(CreateCommand::new("modskip").description("Skips the current song without a vote"))
}

// Comandos de información

fn progress_command() -> CreateCommand {
    CreateCommand::new("progress").description("Shows how far into the song playback is")
}

fn eta_command() -> CreateCommand {
    CreateCommand::new("eta").description("Shows when your next song will play")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Lists the songs in the queue")
}

fn queuelength_command() -> CreateCommand {
    CreateCommand::new("queuelength").description("Shows how many songs are queued")
}

fn playing_command() -> CreateCommand {
    CreateCommand::new("playing").description("Shows the current song and its skip votes")
}
