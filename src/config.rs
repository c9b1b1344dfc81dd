//! Configuration loader and validator for the release watch bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub spotify: Spotify,
    pub telegram: Telegram,
    #[serde(default)]
    pub playlist: Playlist,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Spotify Web API credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Spotify {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_accounts_base")]
    pub accounts_base: String,
    #[serde(default = "default_market")]
    pub market: String,
    /// Longest `Retry-After` the bot is willing to sleep through before
    /// giving up on the whole run.
    #[serde(default = "default_max_retry_wait")]
    pub max_retry_wait_seconds: u64,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default)]
    pub operator: Option<Operator>,
    /// Group chats whose members may be resolved by username.
    #[serde(default)]
    pub groups: Vec<i64>,
}

/// Where escalation reports go. Either field is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operator {
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Managed playlist settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub enabled: bool,
    pub name: String,
    pub description: String,
}

impl Default for Playlist {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "New Releases".into(),
            description: "New releases from the artists you follow".into(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.spotify.com/".into()
}

fn default_accounts_base() -> String {
    "https://accounts.spotify.com/".into()
}

fn default_market() -> String {
    "US".into()
}

fn default_max_retry_wait() -> u64 {
    60
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/releases.db", self.app.resolved_data_dir()))
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.spotify.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("spotify.client_id must be non-empty"));
    }
    if cfg.spotify.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("spotify.client_secret must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.spotify.redirect_uri).is_err() {
        return Err(ConfigError::Invalid("spotify.redirect_uri must be an absolute URL"));
    }
    if reqwest::Url::parse(&cfg.spotify.api_base).is_err() {
        return Err(ConfigError::Invalid("spotify.api_base must be an absolute URL"));
    }
    if reqwest::Url::parse(&cfg.spotify.accounts_base).is_err() {
        return Err(ConfigError::Invalid("spotify.accounts_base must be an absolute URL"));
    }
    if cfg.spotify.market.trim().is_empty() {
        return Err(ConfigError::Invalid("spotify.market must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if let Some(op) = &cfg.telegram.operator {
        let has_handle = op.handle.as_deref().is_some_and(|h| !h.trim().is_empty());
        if op.chat_id.is_none() && !has_handle {
            return Err(ConfigError::Invalid(
                "telegram.operator needs a chat_id or a handle",
            ));
        }
    }

    if cfg.playlist.enabled && cfg.playlist.name.trim().is_empty() {
        return Err(ConfigError::Invalid("playlist.name must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the bot.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

spotify:
  client_id: "YOUR_SPOTIFY_CLIENT_ID"
  client_secret: "YOUR_SPOTIFY_CLIENT_SECRET"
  redirect_uri: "http://localhost:5000/callback"
  market: "US"
  max_retry_wait_seconds: 60

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  operator:
    handle: "your_telegram_username"
  groups:
    - -1001234567890

playlist:
  enabled: true
  name: "New Releases"
  description: "New releases from the artists you follow"
"#
}
