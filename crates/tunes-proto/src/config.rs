use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub playlist: PlaylistConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Where downloaded tracks are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "platform::default_library_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of concurrent download workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay before an idle worker polls the queue again.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Keep downloading but never start the player.
    #[serde(default)]
    pub download_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Playlist URL; `{date}` is replaced with the day as `YYYY-MM-DD`.
    #[serde(default = "default_url_template")]
    pub url_template: String,
    /// Oldest day discovery walks back to.
    #[serde(default = "default_floor_date")]
    pub floor_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    #[default]
    Plain,
    Panel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default)]
    pub mode: UiMode,
    #[serde(default)]
    pub verbose: bool,
    /// How long quit waits for the display to flush in verbose or panel mode.
    #[serde(default = "default_quit_grace_ms")]
    pub quit_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            dir: platform::default_library_dir(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_delay_ms: default_retry_delay_ms(),
            download_only: false,
        }
    }
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            floor_date: default_floor_date(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: default_player_args(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            mode: UiMode::default(),
            verbose: false,
            quit_grace_ms: default_quit_grace_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_workers() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_url_template() -> String {
    "http://tunes.io/xspf/{date}/".to_string()
}

fn default_floor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2012, 9, 8).unwrap_or_default()
}

fn default_player_command() -> String {
    "play".to_string()
}

fn default_player_args() -> Vec<String> {
    ["--no-show-progress", "--volume", ".5", "--type", "mp3", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_quit_grace_ms() -> u64 {
    500
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl Config {
    /// Load from `path`, writing a default file there first if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
