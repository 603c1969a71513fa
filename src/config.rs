use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `api.url`.
pub const API_URL_ENV: &str = "VBOARD_API_URL";
/// Overrides the signed-in user.
pub const USER_ID_ENV: &str = "VBOARD_USER_ID";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Act as this user unless `VBOARD_USER_ID` says otherwise
  pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// Per-request timeout; an expired request counts as a failed fetch
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false every read misses and nothing is written
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/vboard/cache.db)
  pub path: Option<PathBuf>,
  /// Reject stored values larger than this many bytes
  pub max_value_bytes: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      max_value_bytes: None,
    }
  }
}

fn default_url() -> String {
  "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vboard/config.yaml
  ///
  /// With no file at all the defaults are used. Environment overrides are
  /// applied last.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_overrides(|key| std::env::var(key).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Apply environment overrides, read through `var` so tests need not touch
  /// the process environment.
  fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
    if let Some(url) = var(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
      self.api.url = url.trim().to_string();
    }
    if let Some(user) = var(USER_ID_ENV).filter(|v| !v.trim().is_empty()) {
      self.user_id = Some(user.trim().to_string());
    }
    self
  }

  /// User id fixed by config or environment, if any.
  pub fn user_id(&self) -> Option<&str> {
    self.user_id.as_deref().filter(|u| !u.is_empty())
  }
}
