use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Where the analysis service lives and how patient to be with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the `/analyze` and `/analysis/{id}` routes hang off.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay before the first poll, and the floor for progress pacing.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling for both error backoff and progress pacing.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive transport failures tolerated before giving up.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl PollingConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Never below the initial delay, so pacing always has a non-empty range.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms))
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5173/api".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    4000
}

fn default_request_timeout_ms() -> u64 {
    15000
}

fn default_user_agent() -> String {
    concat!("stockwatch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            tracing::info!("Wrote default config to {:?}", config_path);
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.polling.initial_delay(), Duration::from_millis(1000));
        assert_eq!(config.polling.max_delay(), Duration::from_millis(10000));
        assert_eq!(config.polling.max_consecutive_errors, 5);
        assert!(config.api.base_url.starts_with("http://"));
        assert!(config.api.user_agent.starts_with("stockwatch/"));
        assert!(Config::config_path().ends_with("stockwatch/config.toml"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [api]
            base_url = "https://stocks.example.com/api"

            [polling]
            max_delay_ms = 30000
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://stocks.example.com/api");
        assert_eq!(config.api.request_timeout(), Duration::from_millis(15000));
        assert_eq!(config.polling.initial_delay_ms, 1000);
        assert_eq!(config.polling.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_max_delay_never_below_initial() {
        let polling = PollingConfig {
            initial_delay_ms: 5000,
            max_delay_ms: 100,
            max_consecutive_errors: 5,
        };
        assert_eq!(polling.max_delay(), polling.initial_delay());
    }
}
