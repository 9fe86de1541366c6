use anyhow::Result;
use serenity::{
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod stats;
mod voice;

use crate::audio::service::MusicService;
use crate::bot::MusicBot;
use crate::config::Config;
use crate::sources::YtDlpResolver;
use crate::stats::StatsReporter;
use crate::voice::SongbirdPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let resolver = YtDlpResolver::new(config.ytdlp_path.clone());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&resolver).await;
    }

    match resolver.verify().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => error!("❌ yt-dlp no disponible ({}): {:?}", config.ytdlp_path, e),
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let service = Arc::new(MusicService::new(
        Arc::new(SongbirdPlatform::new(songbird.clone())),
        Arc::new(resolver),
        config.music_settings(),
    ));

    let shutdown = CancellationToken::new();
    let stats = StatsReporter::from_config(&config)?;
    let handler = MusicBot::new(config.clone(), service.clone(), stats, shutdown.clone());

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();
        service.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(resolver: &YtDlpResolver) -> Result<()> {
    // songbird decodifica los archivos con symphonia: solo hace falta yt-dlp
    let version = resolver.verify().await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
