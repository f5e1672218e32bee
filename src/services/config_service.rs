use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const BASE_URL_ENV: &str = "CHAT_API_BASE_URL";
pub const INIT_DATA_ENV: &str = "TELEGRAM_INIT_DATA";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find data directory")]
    NoDataDir,

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid API base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub init_data: Option<String>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

/// Config with defaults and environment overrides applied
#[derive(Clone)]
pub struct EffectiveConfig {
    pub api_base_url: url::Url,
    pub request_timeout: Duration,
    pub init_data: Option<String>,
    pub log_filter: String,
}

// init_data is a session credential; never print it
impl std::fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("init_data", &self.init_data.as_ref().map(|_| "<redacted>"))
            .field("log_filter", &self.log_filter)
            .finish()
    }
}

pub fn get_app_data_dir() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir()
        .ok_or(ConfigError::NoDataDir)?
        .join("DeepChat");

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config() -> Result<Config, ConfigError> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let config_path = get_config_path()?;
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&config_path, content)?;
    Ok(())
}

pub fn set_base_url(url: &str) -> Result<(), ConfigError> {
    parse_base_url(url)?;
    let mut config = load_config().unwrap_or_default();
    config.api_base_url = Some(url.to_string());
    save_config(&config)
}

/// Load the config file and resolve it against the environment
pub fn get_effective_config() -> Result<EffectiveConfig, ConfigError> {
    let config = load_config()?;
    resolve(
        config,
        std::env::var(BASE_URL_ENV).ok(),
        std::env::var(INIT_DATA_ENV).ok(),
    )
}

fn resolve(
    config: Config,
    env_base_url: Option<String>,
    env_init_data: Option<String>,
) -> Result<EffectiveConfig, ConfigError> {
    let base_url = env_base_url
        .filter(|v| !v.trim().is_empty())
        .or(config.api_base_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let timeout_secs = config
        .request_timeout_secs
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(EffectiveConfig {
        api_base_url: parse_base_url(&base_url)?,
        request_timeout: Duration::from_secs(timeout_secs),
        init_data: env_init_data.or(config.init_data).filter(|v| !v.is_empty()),
        log_filter: config.log_filter.unwrap_or_else(|| "info".to_string()),
    })
}

/// Parse the API root. A trailing slash is enforced so endpoint paths join
/// underneath it instead of replacing the last segment.
pub fn parse_base_url(raw: &str) -> Result<url::Url, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let mut url = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "not a base URL".to_string(),
        });
    }

    with_trailing_slash(&mut url);
    Ok(url)
}

/// Ensure the path ends in `/` so `Url::join` resolves under it
pub fn with_trailing_slash(url: &mut url::Url) {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
}
