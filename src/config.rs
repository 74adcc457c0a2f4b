use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Lower bound for the poll interval, in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_site_base_url")]
    pub site_base_url: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    pub proxy: Option<String>,

    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    #[serde(default)]
    pub retry_undelivered_each_cycle: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// The configured interval when it was below the floor and got raised.
    #[serde(skip)]
    pub clamped_poll_interval: Option<u64>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rss-push");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("posts.db").to_string_lossy().to_string()
}

fn default_feed_url() -> String {
    "https://rss.nodeseek.com/".to_string()
}

fn default_site_base_url() -> String {
    "https://www.nodeseek.com".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_summary_max_chars() -> usize {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            feed_url: default_feed_url(),
            site_base_url: default_site_base_url(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            proxy: None,
            telegram_api_base: default_telegram_api_base(),
            summary_max_chars: default_summary_max_chars(),
            retry_undelivered_each_cycle: false,
            log_level: default_log_level(),
            clamped_poll_interval: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map_or_else(Self::config_path, Path::to_path_buf);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.validated()
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rss-push")
            .join("config.toml")
    }

    fn validated(mut self) -> Result<Self> {
        if self.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            self.clamped_poll_interval = Some(self.poll_interval_secs);
            self.poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.summary_max_chars == 0 {
            return Err(AppError::Config(
                "summary_max_chars must be greater than zero".to_string(),
            ));
        }
        url::Url::parse(&self.feed_url)
            .map_err(|e| AppError::Config(format!("invalid feed_url: {}", e)))?;
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy)
                .map_err(|e| AppError::Config(format!("invalid proxy: {}", e)))?;
        }
        self.site_base_url = self.site_base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Report adjustments made while loading. Call once logging is up.
    pub fn log_adjustments(&self) {
        if let Some(requested) = self.clamped_poll_interval {
            tracing::warn!(
                "poll_interval_secs = {} is below the floor, using {}",
                requested,
                self.poll_interval_secs
            );
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
