use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const DEFAULT_API_URL: &str = "https://www.google.com/reader/api/0/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Login token sent as `Authorization: GoogleLogin auth=...`.
    pub auth_key: Option<String>,

    /// Pre-seeded edit token. Fetched from the API when absent or expired.
    pub edit_token: Option<String>,

    /// Upper bound on ids requested per saved view.
    #[serde(default = "default_cache_items")]
    pub cache_items: u32,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,
}

fn cache_root() -> PathBuf {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trifle");
    std::fs::create_dir_all(&cache_dir).ok();
    cache_dir
}

fn default_db_path() -> String {
    cache_root().join("metadata").to_string_lossy().to_string()
}

fn default_content_dir() -> String {
    cache_root().join("content").to_string_lossy().to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_cache_items() -> u32 {
    400
}

fn default_max_in_flight() -> usize {
    8
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            content_dir: default_content_dir(),
            api_url: default_api_url(),
            auth_key: None,
            edit_token: None,
            cache_items: default_cache_items(),
            max_in_flight: default_max_in_flight(),
            request_timeout_secs: default_request_timeout(),
            refresh_interval_minutes: default_refresh_interval(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.max_in_flight == 0 {
            return Err(AppError::Config("max_in_flight must be at least 1".to_string()));
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trifle")
            .join("config.toml")
    }
}
