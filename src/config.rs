use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST backend (e.g., "https://school.example.edu/api/")
  pub base_url: String,
  /// Real-time endpoint; defaults to the REST host when unset
  pub socket_url: Option<String>,
  /// Per-request timeout in seconds
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

impl ApiConfig {
  pub fn socket_url(&self) -> &str {
    self.socket_url.as_deref().unwrap_or(&self.base_url)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Location of the key-value database (default: $XDG_DATA_HOME/schoolsync/storage.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Age after which a cached list is refetched before being served
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
}

impl CacheConfig {
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(self.stale_after_secs))
      .unwrap_or_else(|_| chrono::Duration::seconds(default_stale_after_secs() as i64))
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after_secs(),
    }
  }
}

/// Socket lifecycle tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
  #[serde(default = "default_health_check_secs")]
  pub health_check_secs: u64,
  /// Pause between teardown and reopening on focus/health-check reconnects
  #[serde(default = "default_reconnect_delay_ms")]
  pub reconnect_delay_ms: u64,
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
  /// Attempts per connect sequence before giving up until the next trigger
  #[serde(default = "default_reconnection_attempts")]
  pub reconnection_attempts: u32,
  /// Base delay of the linear backoff between attempts
  #[serde(default = "default_reconnection_delay_ms")]
  pub reconnection_delay_ms: u64,
  /// How many recent event ids are remembered per channel for de-duplication
  #[serde(default = "default_dedupe_window")]
  pub dedupe_window: usize,
}

impl RealtimeConfig {
  pub fn health_check_interval(&self) -> Duration {
    Duration::from_secs(self.health_check_secs)
  }

  pub fn reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_delay_ms)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn reconnection_delay(&self) -> Duration {
    Duration::from_millis(self.reconnection_delay_ms)
  }
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      health_check_secs: default_health_check_secs(),
      reconnect_delay_ms: default_reconnect_delay_ms(),
      connect_timeout_ms: default_connect_timeout_ms(),
      reconnection_attempts: default_reconnection_attempts(),
      reconnection_delay_ms: default_reconnection_delay_ms(),
      dedupe_window: default_dedupe_window(),
    }
  }
}

fn default_request_timeout_secs() -> u64 {
  20
}

fn default_stale_after_secs() -> u64 {
  300
}

fn default_health_check_secs() -> u64 {
  30
}

fn default_reconnect_delay_ms() -> u64 {
  1000
}

fn default_connect_timeout_ms() -> u64 {
  10_000
}

fn default_reconnection_attempts() -> u32 {
  5
}

fn default_reconnection_delay_ms() -> u64 {
  1000
}

fn default_dedupe_window() -> usize {
  256
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./schoolsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/schoolsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/schoolsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("schoolsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("schoolsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Bearer token for command-line use.
  ///
  /// Checks SCHOOLSYNC_TOKEN.
  pub fn token_from_env() -> Option<String> {
    std::env::var("SCHOOLSYNC_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// Signed-in user id for command-line use.
  ///
  /// Checks SCHOOLSYNC_USER_ID.
  pub fn user_id_from_env() -> Option<String> {
    std::env::var("SCHOOLSYNC_USER_ID")
      .ok()
      .filter(|u| !u.is_empty())
  }
}
