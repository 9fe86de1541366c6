//! # Bot Module
//!
//! Discord side of the music bot.
//!
//! The bot is built around the [`MusicBot`] struct which implements
//! Serenity's [`EventHandler`] trait. It:
//!
//! - registers the slash commands on `ready`
//! - routes each command to [`handlers::handle_command`], which calls the
//!   [`MusicService`]
//! - keeps the skip-vote quota in sync with the bot channel's occupancy
//! - tears a guild's playback down when the bot is disconnected from voice
//! - pushes server counts through the [`StatsReporter`]

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        UserId, VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod messages;

use crate::{audio::service::MusicService, config::Config, stats::StatsReporter};

/// Main Discord event handler.
pub struct MusicBot {
    config: Arc<Config>,
    pub service: Arc<MusicService>,
    stats: Option<Arc<StatsReporter>>,
    /// Stops the periodic stats task on shutdown
    shutdown: CancellationToken,
    stats_started: std::sync::atomic::AtomicBool,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        service: Arc<MusicService>,
        stats: Option<StatsReporter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            service,
            stats: stats.map(Arc::new),
            shutdown,
            stats_started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set they are registered on that guild only (instant
    /// propagation, useful for development); otherwise globally.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
            }
        }

        info!("✅ Comandos registrados");
        Ok(())
    }

    /// Recomputes the skip quota from the users in the bot's channel.
    pub fn refresh_vote_quota(&self, ctx: &Context, guild_id: GuildId) {
        let Some(channel_id) = self.service.bot_channel(guild_id) else {
            return;
        };
        let members = channel_member_count(ctx, guild_id, channel_id);
        self.service.on_membership_changed(guild_id, members);
    }

    async fn report_stats(&self, ctx: &Context) {
        if let Some(stats) = &self.stats {
            let bot_id = ctx.cache.current_user().id;
            stats.update(bot_id, ctx.cache.guild_count()).await;
        }
    }

    fn start_periodic_stats(&self, ctx: &Context, bot_id: UserId) {
        let Some(stats) = &self.stats else {
            return;
        };
        // `ready` se repite tras cada reconexión
        if self
            .stats_started
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        stats
            .clone()
            .spawn_periodic(ctx.cache.clone(), bot_id, self.shutdown.clone());
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }

        if let Some(stats) = &self.stats {
            stats.update(ready.user.id, ready.guilds.len()).await;
        }
        self.start_periodic_stats(&ctx, ready.user.id);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new == Some(true) {
            info!("➕ Añadido a guild {} ({})", guild.name, guild.id);
            self.report_stats(&ctx).await;
        }
    }

    async fn guild_delete(&self, ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            return;
        }
        info!("➖ Eliminado de guild {}", incomplete.id);
        self.service.teardown(incomplete.id).await;
        self.report_stats(&ctx).await;
    }

    /// Tracks the bot channel's occupancy and notices when the bot itself is
    /// disconnected from voice by someone else.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(bot_channel) = self.service.bot_channel(guild_id) else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        let old_channel = old.as_ref().and_then(|state| state.channel_id);

        if new.user_id == bot_id {
            // Un cambio de canal iniciado por /join ya movió la conexión
            let left_our_channel = old.is_none() || old_channel == Some(bot_channel);
            if new.channel_id.is_none() && left_our_channel {
                warn!("🔌 Bot desconectado de la voz en guild {}", guild_id);
                self.service.teardown(guild_id).await;
                return;
            }

            // Movido por un usuario: seguir al canal real
            if let Some(channel_id) = new.channel_id {
                if self.service.on_bot_moved(guild_id, channel_id) {
                    self.refresh_vote_quota(&ctx, guild_id);
                    return;
                }
            }
        }

        if old_channel == Some(bot_channel) || new.channel_id == Some(bot_channel) {
            self.refresh_vote_quota(&ctx, guild_id);
        }
    }
}

/// Voice channel the user is connected to, from the cache.
pub fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Users (the bot included) connected to `channel_id`.
fn channel_member_count(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> usize {
    ctx.cache.guild(guild_id).map_or(0, |guild| {
        guild
            .voice_states
            .values()
            .filter(|voice_state| voice_state.channel_id == Some(channel_id))
            .count()
    })
}
