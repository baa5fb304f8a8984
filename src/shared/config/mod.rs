//! Offline engine configuration
//!
//! [`OfflineConfig`] carries every recognised option with its default. It can be
//! built in code through [`OfflineConfigBuilder`], parsed from TOML, and then
//! overridden from `EXAMSYNC_*` environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default server URL
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";

/// Advisory storage quota assumed for the local store (5 MiB)
pub const DEFAULT_STORAGE_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Offline engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Failed sync attempts allowed before an item needs manual resolution
    pub max_retry_attempts: u32,
    /// Delay between two items of one sync pass
    pub sync_pacing_delay_ms: u64,
    /// Records untouched for longer than this are purged
    pub retention_max_age_days: u32,
    /// Assumed storage capacity, used for usage reporting
    pub storage_quota_bytes: u64,
    /// Delay between a local save and the sync pass it triggers
    pub sync_debounce_ms: u64,
    /// Interval of the periodic sync pass while online
    pub sync_interval_secs: u64,
    /// Interval of the retention sweep
    pub retention_interval_secs: u64,
    /// Base URL of the examination API
    pub api_base_url: String,
    /// Bearer token for the examination API
    pub api_token: Option<String>,
    /// URL polled to detect connectivity
    pub probe_url: Option<String>,
    /// Interval of the connectivity probe
    pub probe_interval_secs: u64,
    /// Per-request timeout of the HTTP client
    pub request_timeout_secs: u64,
    /// SQLite database file, platform data dir when unset
    pub database_path: Option<PathBuf>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            sync_pacing_delay_ms: 100,
            retention_max_age_days: 7,
            storage_quota_bytes: DEFAULT_STORAGE_QUOTA_BYTES,
            sync_debounce_ms: 1000,
            sync_interval_secs: 30,
            retention_interval_secs: 24 * 60 * 60,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            probe_url: None,
            probe_interval_secs: 15,
            request_timeout_secs: 30,
            database_path: None,
        }
    }
}

impl OfflineConfig {
    /// Create a new OfflineConfigBuilder
    pub fn builder() -> OfflineConfigBuilder {
        OfflineConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: OfflineConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let source = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Apply `EXAMSYNC_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key, raw))
        }

        if let Some(raw) = lookup("EXAMSYNC_MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = number("EXAMSYNC_MAX_RETRY_ATTEMPTS", raw)?;
        }
        if let Some(raw) = lookup("EXAMSYNC_SYNC_PACING_DELAY_MS") {
            self.sync_pacing_delay_ms = number("EXAMSYNC_SYNC_PACING_DELAY_MS", raw)?;
        }
        if let Some(raw) = lookup("EXAMSYNC_RETENTION_MAX_AGE_DAYS") {
            self.retention_max_age_days = number("EXAMSYNC_RETENTION_MAX_AGE_DAYS", raw)?;
        }
        if let Some(raw) = lookup("EXAMSYNC_STORAGE_QUOTA_BYTES") {
            self.storage_quota_bytes = number("EXAMSYNC_STORAGE_QUOTA_BYTES", raw)?;
        }
        if let Some(url) = lookup("EXAMSYNC_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = lookup("EXAMSYNC_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(url) = lookup("EXAMSYNC_PROBE_URL") {
            self.probe_url = Some(url);
        }
        if let Some(path) = lookup("EXAMSYNC_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max_retry_attempts",
                self.max_retry_attempts.to_string(),
            ));
        }
        if self.retention_max_age_days == 0 {
            return Err(ConfigError::InvalidValue(
                "retention_max_age_days",
                self.retention_max_age_days.to_string(),
            ));
        }
        if self.storage_quota_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "storage_quota_bytes",
                self.storage_quota_bytes.to_string(),
            ));
        }
        for (name, secs) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("retention_interval_secs", self.retention_interval_secs),
            ("probe_interval_secs", self.probe_interval_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue(name, secs.to_string()));
            }
        }
        check_url(&self.api_base_url)?;
        if let Some(url) = &self.probe_url {
            check_url(url)?;
        }
        Ok(())
    }

    pub fn sync_pacing_delay(&self) -> Duration {
        Duration::from_millis(self.sync_pacing_delay_ms)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn retention_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_max_age_days))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// Resolved SQLite file location
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("examsync");
            path.push("offline.db");
            path
        })
    }
}

fn check_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_string()))
    }
}

/// Builder for OfflineConfig
#[derive(Debug, Default)]
pub struct OfflineConfigBuilder {
    config: OfflineConfig,
}

impl OfflineConfigBuilder {
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    pub fn sync_pacing_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.sync_pacing_delay_ms = delay_ms;
        self
    }

    pub fn retention_max_age_days(mut self, days: u32) -> Self {
        self.config.retention_max_age_days = days;
        self
    }

    pub fn storage_quota_bytes(mut self, bytes: u64) -> Self {
        self.config.storage_quota_bytes = bytes;
        self
    }

    pub fn sync_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.config.sync_debounce_ms = debounce_ms;
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    pub fn retention_interval_secs(mut self, secs: u64) -> Self {
        self.config.retention_interval_secs = secs;
        self
    }

    /// Set the server URL
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.config.probe_url = Some(url.into());
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<OfflineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration: {0}")]
    Io(String),
}
