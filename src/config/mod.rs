use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

/// Delivery engine tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Worker pool size; also the cap on concurrent outbound requests.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    /// Claims held longer than this are assumed lost and recovered.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    #[serde(default = "default_response_body_limit")]
    pub response_body_limit: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout(),
            backoff_base_secs: default_backoff_base(),
            poll_interval_secs: default_poll_interval(),
            scan_batch_size: default_scan_batch_size(),
            stale_after_secs: default_stale_after(),
            response_body_limit: default_response_body_limit(),
            user_agent: default_user_agent(),
        }
    }
}

impl DeliveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("delivery.workers must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("delivery.queue_capacity must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("delivery.request_timeout_secs must be greater than 0");
        }
        if self.backoff_base_secs == 0 {
            anyhow::bail!("delivery.backoff_base_secs must be greater than 0");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("delivery.poll_interval_secs must be greater than 0");
        }
        if self.scan_batch_size == 0 {
            anyhow::bail!("delivery.scan_batch_size must be greater than 0");
        }
        if self.stale_after_secs <= self.request_timeout_secs {
            anyhow::bail!("delivery.stale_after_secs must be longer than delivery.request_timeout_secs");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_database_path() -> String {
    "./data/relay.db".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_workers() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    30
}

fn default_scan_batch_size() -> usize {
    100
}

fn default_stale_after() -> u64 {
    300
}

fn default_response_body_limit() -> usize {
    2048
}

fn default_user_agent() -> String {
    format!("pebble-relay/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> usize {
    20
}

fn default_max_page_size() -> usize {
    100
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!(
                "Could not read config file '{}': {}. Run `pebble-relay init` to create one.",
                path.display(),
                e
            )
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            anyhow::bail!("database.pool_size must be greater than 0");
        }
        if self.api.default_page_size == 0 {
            anyhow::bail!("api.default_page_size must be greater than 0");
        }
        if self.api.default_page_size > self.api.max_page_size {
            anyhow::bail!("api.default_page_size must not exceed api.max_page_size");
        }
        self.delivery.validate()?;
        Ok(())
    }
}
