use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

use crate::audio::{guild::GuildSettings, guild::MAX_VOLUME, service::ServiceSettings};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: u32, // Porcentaje, 0-200
    pub max_queue_size: usize,
    pub staging_dir: PathBuf,
    pub staging_timeout: Duration, // 0 = sin límite
    pub blocked_hosts: Vec<String>,
    pub ytdlp_path: String,

    // Estadísticas
    pub carbon_key: Option<String>,
    pub discord_bots_key: Option<String>,
    pub stats_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create the staging directory if it doesn't exist
        std::fs::create_dir_all(&config.staging_dir).with_context(|| {
            format!("no se pudo crear {}", config.staging_dir.display())
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup; `load` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            // Audio
            default_volume: var("DEFAULT_VOLUME", "50")
                .parse()
                .context("DEFAULT_VOLUME inválido")?,
            max_queue_size: var("MAX_QUEUE_SIZE", "10")
                .parse()
                .context("MAX_QUEUE_SIZE inválido")?,
            staging_dir: var("STAGING_DIR", "audio_tmp").into(),
            staging_timeout: humantime::parse_duration(&var("STAGING_TIMEOUT", "5m"))
                .context("STAGING_TIMEOUT inválido")?,
            blocked_hosts: match lookup("BLOCKED_HOSTS") {
                Some(hosts) => parse_hosts(&hosts),
                None => defaults.blocked_hosts,
            },
            ytdlp_path: var("YTDLP_PATH", "yt-dlp"),

            // Estadísticas
            carbon_key: lookup("CARBON_KEY").filter(|key| !key.trim().is_empty()),
            discord_bots_key: lookup("DISCORD_BOTS_KEY").filter(|key| !key.trim().is_empty()),
            stats_interval: humantime::parse_duration(&var("STATS_INTERVAL", "1h"))
                .context("STATS_INTERVAL inválido")?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The application ID must be non-zero
    /// - Volume must be between 0 and 200 percent
    /// - Queue size must be greater than 0
    /// - The stats interval must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.application_id == 0 {
            anyhow::bail!("Application ID must not be 0");
        }

        if self.default_volume > MAX_VOLUME {
            anyhow::bail!(
                "Default volume must be between 0 and {}, got: {}",
                MAX_VOLUME,
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.stats_interval.is_zero() {
            anyhow::bail!("Stats interval must be greater than 0");
        }

        Ok(())
    }

    /// Settings handed to the music service.
    pub fn music_settings(&self) -> ServiceSettings {
        ServiceSettings {
            guild: GuildSettings {
                capacity: self.max_queue_size,
                default_volume: self.default_volume,
                staging_timeout: (!self.staging_timeout.is_zero()).then_some(self.staging_timeout),
            },
            staging_dir: self.staging_dir.clone(),
            blocked_hosts: self.blocked_hosts.clone(),
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {} queue, staging in {} (timeout {})\n  \
            Sources: {} (blocked: {})\n  \
            Stats: carbon={}, bots={}, every {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.staging_dir.display(),
            if self.staging_timeout.is_zero() {
                "none".to_string()
            } else {
                humantime::format_duration(self.staging_timeout).to_string()
            },
            self.ytdlp_path,
            self.blocked_hosts.join(", "),
            self.carbon_key.is_some(),
            self.discord_bots_key.is_some(),
            humantime::format_duration(self.stats_interval)
        )
    }
}

fn parse_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(|host| host.trim().to_ascii_lowercase())
        .filter(|host| !host.is_empty())
        .collect()
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            default_volume: 50,
            max_queue_size: 10,
            staging_dir: "audio_tmp".into(),
            staging_timeout: Duration::from_secs(300),
            blocked_hosts: vec!["soundcloud.com".to_string()],
            ytdlp_path: "yt-dlp".to_string(),

            // Stats defaults
            carbon_key: None,
            discord_bots_key: None,
            stats_interval: Duration::from_secs(3600),
        }
    }
}
