use crate::integrations::{archipelago, discord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the Discord bot token
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Used only when `DISCORD_TOKEN` is unset
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    discord::DEFAULT_API_BASE.to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Pause between the end of one pass and the start of the next
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Trackers fetched at once during a pass (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_poll_interval() -> u64 {
    600
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_concurrency() -> usize {
    1
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    1000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl NotificationConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    archipelago::DEFAULT_BASE_URL.to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_subscriptions_file")]
    pub subscriptions_file: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

fn default_subscriptions_file() -> String {
    "trackers_to_scrape.json".to_string()
}

fn default_state_file() -> String {
    "recent_checks.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            subscriptions_file: default_subscriptions_file(),
            state_file: default_state_file(),
        }
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn subscriptions_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.subscriptions_file))
    }

    pub fn state_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(&self.state_file))
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "apwatch").context("Could not determine home directory")
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

pub fn default_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the default location is used
/// if present and built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found at {}", p.display());
            }
            p.to_path_buf()
        }
        None => {
            let p = default_config_path()?;
            if !p.exists() {
                tracing::debug!("No config at {}, using defaults", p.display());
                return Ok(Config::default());
            }
            p
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    if config.polling.concurrency == 0 {
        anyhow::bail!("polling.concurrency must be at least 1");
    }
    Ok(config)
}

/// The messaging token: `DISCORD_TOKEN` first, then `[discord] token`.
pub fn resolve_token(config: &Config) -> Result<String> {
    token_from(std::env::var(TOKEN_ENV).ok(), config)
}

fn token_from(env_value: Option<String>, config: &Config) -> Result<String> {
    env_value
        .or_else(|| config.discord.token.clone())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .with_context(|| {
            format!(
                "No Discord token configured. Set {} or [discord] token in the config file.",
                TOKEN_ENV
            )
        })
}
