//! Server-count reporting to bot listing sites.
//!
//! Reports go to Carbonitex and bots.discord.pw when the bot becomes ready,
//! when it joins or leaves a guild, and on a fixed interval. Each target is
//! enabled by its API key; failures are logged and never retried.

use anyhow::Result;
use serde::Serialize;
use serenity::{cache::Cache, model::id::UserId};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;

const CARBONITEX_URL: &str = "https://www.carbonitex.net/discord/data/botdata.php";
const DISCORD_BOTS_URL: &str = "https://bots.discord.pw/api";

#[derive(Debug, Serialize)]
struct CarbonPayload<'a> {
    key: &'a str,
    servercount: usize,
}

#[derive(Debug, Serialize)]
struct DiscordBotsPayload {
    server_count: usize,
}

pub struct StatsReporter {
    client: reqwest::Client,
    carbon_key: Option<String>,
    discord_bots_key: Option<String>,
    interval: Duration,
    carbon_url: String,
    discord_bots_url: String,
}

impl StatsReporter {
    /// `None` when no listing site is configured.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if config.carbon_key.is_none() && config.discord_bots_key.is_none() {
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Some(Self {
            client,
            carbon_key: config.carbon_key.clone(),
            discord_bots_key: config.discord_bots_key.clone(),
            interval: config.stats_interval,
            carbon_url: CARBONITEX_URL.to_string(),
            discord_bots_url: DISCORD_BOTS_URL.to_string(),
        }))
    }

    /// Pushes `server_count` to every configured site.
    pub async fn update(&self, bot_id: UserId, server_count: usize) {
        if let Some(key) = &self.carbon_key {
            let payload = CarbonPayload {
                key,
                servercount: server_count,
            };
            match self.client.post(&self.carbon_url).form(&payload).send().await {
                Ok(resp) => info!(
                    "📊 Carbonitex respondió {} para {} servidores",
                    resp.status(),
                    server_count
                ),
                Err(e) => warn!("⚠️ Error enviando estadísticas a Carbonitex: {}", e),
            }
        }

        if let Some(key) = &self.discord_bots_key {
            let url = discord_bots_stats_url(&self.discord_bots_url, bot_id);
            let request = self
                .client
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, key)
                .json(&DiscordBotsPayload { server_count });

            match request.send().await {
                Ok(resp) => info!(
                    "📊 bots.discord.pw respondió {} para {} servidores",
                    resp.status(),
                    server_count
                ),
                Err(e) => warn!("⚠️ Error enviando estadísticas a bots.discord.pw: {}", e),
            }
        }
    }

    /// Reports the cached guild count every interval until `cancel` fires.
    pub fn spawn_periodic(
        self: Arc<Self>,
        cache: Arc<Cache>,
        bot_id: UserId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // El primer tick es inmediato y `ready` ya reportó
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => self.update(bot_id, cache.guild_count()).await,
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

fn discord_bots_stats_url(base: &str, bot_id: UserId) -> String {
    format!("{}/bots/{}/stats", base, bot_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(carbon: Option<&str>, bots: Option<&str>) -> Config {
        Config {
            carbon_key: carbon.map(str::to_string),
            discord_bots_key: bots.map(str::to_string),
            ..Config::default()
        }
    }

    #[test]
    fn disabled_without_keys() {
        assert!(StatsReporter::from_config(&config(None, None)).unwrap().is_none());
        assert!(StatsReporter::from_config(&config(Some("k"), None)).unwrap().is_some());
    }

    #[test]
    fn payloads_match_site_formats() {
        let json = serde_json::to_value(DiscordBotsPayload { server_count: 12 }).unwrap();
        assert_eq!(json, serde_json::json!({ "server_count": 12 }));

        assert_eq!(
            discord_bots_stats_url(DISCORD_BOTS_URL, UserId::new(99)),
            "https://bots.discord.pw/api/bots/99/stats"
        );
    }

    #[tokio::test]
    async fn unreachable_sites_are_logged_not_fatal() {
        let mut reporter = StatsReporter::from_config(&config(Some("k"), Some("b")))
            .unwrap()
            .unwrap();
        reporter.carbon_url = "http://127.0.0.1:9/botdata.php".to_string();
        reporter.discord_bots_url = "http://127.0.0.1:9/api".to_string();

        reporter.update(UserId::new(99), 3).await;
    }
}
