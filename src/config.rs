use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    audio::player::ControllerSettings,
    sources::{ytdlp::CookieSource, RetryPolicy},
};

const DEFAULT_INVIDIOUS_INSTANCES: &[&str] = &[
    "https://yewtu.be",
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Development commands

    // Search and extraction
    pub youtube_api_key: Option<String>,
    pub invidious_instances: Vec<String>,
    pub ytdlp_path: String,
    pub ytdlp_cookies_file: Option<PathBuf>,
    /// Base64 cookies.txt, for deployments that can only inject env vars.
    pub ytdlp_cookies_base64: Option<String>,
    pub http_timeout_secs: u64,
    pub extraction_timeout_secs: u64,

    // Playback timing
    pub resolve_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub queue_eviction_secs: u64,
    pub selection_timeout_secs: u64,

    // Runtime
    pub worker_threads: usize,
}

impl Config {
    /// Loads the configuration and rejects anything [`Config::validate`] would.
    pub fn load() -> Result<Self> {
        let config = Self::load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env`, then layers defaults and environment variables.
    ///
    /// Variable names are the upper-cased field names (`DISCORD_TOKEN`,
    /// `IDLE_TIMEOUT_SECS`, ...). `INVIDIOUS_INSTANCES` is comma separated.
    /// Nothing is validated, so `--health-check` works without Discord credentials.
    pub fn load_unvalidated() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config: Self = config::Config::builder()
            .set_default("application_id", 0)?
            .set_default("invidious_instances", defaults.invidious_instances.clone())?
            .set_default("ytdlp_path", defaults.ytdlp_path.clone())?
            .set_default("http_timeout_secs", defaults.http_timeout_secs)?
            .set_default("extraction_timeout_secs", defaults.extraction_timeout_secs)?
            .set_default("resolve_timeout_secs", defaults.resolve_timeout_secs)?
            .set_default("connect_timeout_secs", defaults.connect_timeout_secs)?
            .set_default("connect_attempts", defaults.connect_attempts)?
            .set_default("idle_timeout_secs", defaults.idle_timeout_secs)?
            .set_default("sweep_interval_secs", defaults.sweep_interval_secs)?
            .set_default("queue_eviction_secs", defaults.queue_eviction_secs)?
            .set_default("selection_timeout_secs", defaults.selection_timeout_secs)?
            .set_default("worker_threads", defaults.worker_threads as u64)?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("invidious_instances"),
            )
            .build()?
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Sanity-checks values.
    ///
    /// # Validation Rules
    ///
    /// - A Discord token and application id are present
    /// - Every timeout and interval is non-zero
    /// - At least one connect attempt and one worker thread
    /// - Inline cookies are valid base64
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN is required");
        }

        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID is required");
        }

        let timings = [
            ("http_timeout_secs", self.http_timeout_secs),
            ("extraction_timeout_secs", self.extraction_timeout_secs),
            ("resolve_timeout_secs", self.resolve_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("queue_eviction_secs", self.queue_eviction_secs),
            ("selection_timeout_secs", self.selection_timeout_secs),
        ];
        for (name, value) in timings {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.connect_attempts == 0 {
            anyhow::bail!("connect_attempts must be at least 1");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be at least 1");
        }

        if let Some(encoded) = &self.ytdlp_cookies_base64 {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context("YTDLP_COOKIES_BASE64 is not valid base64")?;
        }

        Ok(())
    }

    /// Summary for logging; never includes the token or API key.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Search: YouTube API {}, {} Invidious instances, yt-dlp at {}\n  \
            Cookies: {}\n  \
            Timing: resolve {}s, connect {}s x{}, idle {}s, sweep {}s\n  \
            Runtime: {} worker threads",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            if self.youtube_api_key.is_some() { "on" } else { "off" },
            self.invidious_instances.len(),
            self.ytdlp_path,
            match (&self.ytdlp_cookies_file, &self.ytdlp_cookies_base64) {
                (Some(_), _) => "file",
                (None, Some(_)) => "inline",
                (None, None) => "none",
            },
            self.resolve_timeout_secs,
            self.connect_timeout_secs,
            self.connect_attempts,
            self.idle_timeout_secs,
            self.sweep_interval_secs,
            self.worker_threads,
        )
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            connect_attempts: self.connect_attempts,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            queue_eviction_ttl: Duration::from_secs(self.queue_eviction_secs),
            ..ControllerSettings::default()
        }
    }

    /// Cookies handed to yt-dlp. A file path wins over inline contents.
    pub fn cookie_source(&self) -> Option<CookieSource> {
        if let Some(path) = &self.ytdlp_cookies_file {
            return Some(CookieSource::File(path.clone()));
        }
        let encoded = self.ytdlp_cookies_base64.as_ref()?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
            .map(CookieSource::Inline)
    }

    /// Each extraction attempt is bounded by the same timeout yt-dlp gets.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: self.extraction_timeout(),
            ..RetryPolicy::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.selection_timeout_secs)
    }
}

/// Fallbacks used when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            youtube_api_key: None,
            invidious_instances: DEFAULT_INVIDIOUS_INSTANCES.iter().map(|s| s.to_string()).collect(),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_cookies_file: None,
            ytdlp_cookies_base64: None,
            http_timeout_secs: 10,
            extraction_timeout_secs: 20,

            resolve_timeout_secs: 200,
            connect_timeout_secs: 10,
            connect_attempts: 3,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
            queue_eviction_secs: 1800,
            selection_timeout_secs: 30,

            worker_threads: num_cpus::get(),
        }
    }
}
