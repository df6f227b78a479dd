// Configuration for lofiterm
// config.toml under the user config dir, created with defaults on first run.
// A few env vars win over the file so the API key never has to be written down.

use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::resolver::transport::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::resolver::{LOFI_GIRL_CHANNEL_ID, LOFI_GIRL_STREAMS_URL};

pub const ENV_API_KEY: &str = "YOUTUBE_API_KEY";
pub const ENV_DEFAULT_VOLUME: &str = "LOFITERM_DEFAULT_VOLUME";
pub const ENV_DEFAULT_STATION: &str = "LOFITERM_DEFAULT_STATION";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub youtube: YoutubeConfig,
    pub player: PlayerConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    /// Data API v3 key. Without it discovery starts at the RSS feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub channel_id: String,
    pub streams_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub default_volume: u8,
    pub default_station: String,
    pub volume_step: u8,
    pub mpv_path: PathBuf,
    pub video_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    /// EnvFilter directives, RUST_LOG still takes precedence
    pub filter: String,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            channel_id: LOFI_GIRL_CHANNEL_ID.to_string(),
            streams_url: LOFI_GIRL_STREAMS_URL.to_string(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: 50,
            default_station: "lofi-hip-hop".to_string(),
            volume_step: 5,
            mpv_path: PathBuf::from("mpv"),
            video_mode: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let log_dir = config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lofiterm")
            .join("logs");

        Self {
            log_dir,
            filter: "info,lofiterm=debug".to_string(),
        }
    }
}

impl Config {
    /// File (created if missing) + env overrides, validated
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("lofiterm");

        Ok(config_dir.join("config.toml"))
    }

    /// `lookup` is std::env::var outside of tests
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = lookup(ENV_API_KEY) {
            self.youtube.api_key = Some(key);
        }

        if let Some(volume) = lookup(ENV_DEFAULT_VOLUME) {
            self.player.default_volume = volume
                .trim()
                .parse()
                .with_context(|| format!("{ENV_DEFAULT_VOLUME}={volume} is not a volume"))?;
        }

        if let Some(station) = lookup(ENV_DEFAULT_STATION) {
            self.player.default_station = station;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.player.default_volume > 100 {
            bail!("player.default_volume must be 0-100, got {}", self.player.default_volume);
        }
        if self.player.volume_step == 0 || self.player.volume_step > 100 {
            bail!("player.volume_step must be 1-100, got {}", self.player.volume_step);
        }
        if self.network.connect_timeout_secs == 0 || self.network.request_timeout_secs == 0 {
            bail!("network timeouts must be greater than zero");
        }
        if self.youtube.channel_id.trim().is_empty() {
            bail!("youtube.channel_id cannot be empty");
        }
        Ok(())
    }

    /// The configured key, if it's more than whitespace
    pub fn api_key(&self) -> Option<&str> {
        self.youtube
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
