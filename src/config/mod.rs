use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkerConfig {
    /// PostgreSQL connection string
    #[garde(length(min = 1))]
    pub database_url: String,

    /// AES-256-GCM key for platform session payloads (base64-encoded, 32 bytes)
    #[garde(length(min = 1))]
    pub encryption_key: String,

    /// Comma-separated base64 keys still accepted for decryption after a rotation
    #[serde(default)]
    #[garde(skip)]
    pub previous_encryption_keys: Option<String>,

    /// Delay between claim attempts
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 100))]
    pub poll_interval_ms: u64,

    /// Ceiling on jobs running at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    #[garde(range(min = 1, max = 32))]
    pub max_concurrent_jobs: usize,

    /// Launch the browser without a window
    #[serde(default = "default_headless")]
    #[garde(skip)]
    pub headless: bool,

    /// Explicit browser binary; autodetected when unset
    #[serde(default)]
    #[garde(skip)]
    pub chrome_executable: Option<PathBuf>,

    #[serde(default = "default_navigation_timeout_ms")]
    #[garde(range(min = 1000))]
    pub navigation_timeout_ms: u64,

    #[serde(default = "default_element_timeout_ms")]
    #[garde(range(min = 100))]
    pub element_timeout_ms: u64,

    #[serde(default = "default_listing_url_timeout_ms")]
    #[garde(range(min = 1000))]
    pub listing_url_timeout_ms: u64,

    /// Where remote listing images are downloaded before upload
    #[serde(default)]
    #[garde(skip)]
    pub image_staging_dir: Option<PathBuf>,

    /// Health and metrics listener (e.g., "0.0.0.0:9090")
    #[serde(default = "default_health_bind_addr")]
    #[garde(length(min = 1))]
    pub health_bind_addr: String,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_headless() -> bool {
    true
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_element_timeout_ms() -> u64 {
    15_000
}

fn default_listing_url_timeout_ms() -> u64 {
    20_000
}

fn default_health_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate().map_err(|report| ConfigError::Invalid(report.to_string()))?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Previous keys in the order they were listed, blanks skipped.
    pub fn previous_keys(&self) -> Vec<String> {
        self.previous_encryption_keys
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn automation_timeouts(&self) -> AutomationTimeouts {
        AutomationTimeouts {
            navigation: Duration::from_millis(self.navigation_timeout_ms),
            element: Duration::from_millis(self.element_timeout_ms),
            listing_url: Duration::from_millis(self.listing_url_timeout_ms),
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.image_staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("relist-images"))
    }
}

/// Bounds applied to individual browser operations.
#[derive(Debug, Clone, Copy)]
pub struct AutomationTimeouts {
    pub navigation: Duration,
    pub element: Duration,
    pub listing_url: Duration,
}

impl Default for AutomationTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_millis(default_navigation_timeout_ms()),
            element: Duration::from_millis(default_element_timeout_ms()),
            listing_url: Duration::from_millis(default_listing_url_timeout_ms()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
