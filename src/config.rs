use crate::dispatcher::DispatchTiming;
use crate::duration::DEFAULT_DURATION_SECS;
use crate::overlay::server::CLIENT_PATH;
use crate::tts::DEFAULT_TTS_URL;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub application_id: u64,
    pub database_url: String,
    /// Public base URL of the overlay server (`PORT`), as reachable from OBS.
    pub api_url: String,
    pub port: u16,
    pub log_level: String,
    /// Language code used for speech synthesis.
    pub language: String,
    pub status_message: String,
    pub dev_guild_id: Option<u64>,
    pub register_commands: bool,
    pub hide_commands_disabled: bool,
    pub default_duration_secs: i64,
    pub tts_url: String,

    // Dispatch loop timing
    pub queue_tick_interval_ms: u64,
    pub queue_defer_backoff_ms: u64,
    pub queue_safety_pad_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("DISCORD_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("DISCORD_CLIENT_ID must be set"))?
                .parse()
                .map_err(|_| anyhow::anyhow!("DISCORD_CLIENT_ID must be a valid u64"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/overlaybot.db".to_string()),
            api_url: env::var("API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            port: env_or("PORT", 3000),
            log_level: env::var("LOG").unwrap_or_else(|_| "info".to_string()),
            language: env::var("I18N").unwrap_or_else(|_| "en".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Relaying to your overlay".to_string()),
            dev_guild_id: env::var("DEV_GUILD_ID").ok().and_then(|id| id.parse().ok()),
            register_commands: env_or("REGISTER_COMMANDS", true),
            hide_commands_disabled: env_or("HIDE_COMMANDS_DISABLED", false),
            default_duration_secs: env_or("DEFAULT_DURATION", DEFAULT_DURATION_SECS),
            tts_url: env::var("TTS_URL").unwrap_or_else(|_| DEFAULT_TTS_URL.to_string()),

            queue_tick_interval_ms: env_or("QUEUE_TICK_INTERVAL_MS", 100),
            queue_defer_backoff_ms: env_or("QUEUE_DEFER_BACKOFF_MS", 250),
            queue_safety_pad_ms: env_or("QUEUE_SAFETY_PAD_MS", 250),
        })
    }

    pub fn dispatch_timing(&self) -> DispatchTiming {
        DispatchTiming {
            tick_interval: Duration::from_millis(self.queue_tick_interval_ms.max(1)),
            defer_backoff: Duration::from_millis(self.queue_defer_backoff_ms),
            safety_pad: Duration::from_millis(self.queue_safety_pad_ms),
        }
    }

    /// Link to paste into OBS as a browser source.
    pub fn overlay_link(&self, guild_id: u64) -> String {
        format!("{}{}?guildId={}", self.api_url, CLIENT_PATH, guild_id)
    }
}

/// Unset or unparseable values fall back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field("database_url", &self.database_url)
            .field("api_url", &self.api_url)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("language", &self.language)
            .field("status_message", &self.status_message)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("register_commands", &self.register_commands)
            .field("hide_commands_disabled", &self.hide_commands_disabled)
            .field("default_duration_secs", &self.default_duration_secs)
            .field("tts_url", &self.tts_url)
            .field("queue_tick_interval_ms", &self.queue_tick_interval_ms)
            .field("queue_defer_backoff_ms", &self.queue_defer_backoff_ms)
            .field("queue_safety_pad_ms", &self.queue_safety_pad_ms)
            .finish()
    }
}
