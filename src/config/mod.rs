//! Configuration management for feedsync
//!
//! Configuration is supplied once at startup as a static [`Config`] value.
//! Where it comes from is a capability: anything implementing
//! [`ConfigSource`] can produce and validate one. Two sources ship with the
//! crate, [`EnvConfigSource`] and [`FileConfigSource`]; the binary picks one
//! by explicit construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collection loop settings
    pub collector: CollectorConfig,

    /// Remote telemetry API settings
    pub api: ApiConfig,

    /// Batch replication settings
    pub sync: SyncConfig,

    /// Database connection settings
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// What to do with a tick that fires while a cycle is still running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the tick
    #[default]
    Skip,
    /// Let one tick wait for the running cycle; drop any further ticks
    Queue,
}

impl std::str::FromStr for OverlapPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "queue" => Ok(Self::Queue),
            other => Err(Error::config(format!(
                "invalid overlap policy '{other}', expected 'skip' or 'queue'"
            ))),
        }
    }
}

/// Collection loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Poll interval in milliseconds
    pub interval_ms: u64,

    /// Connection attempts when bootstrapping database pools
    pub retry_attempts: u32,

    /// Base delay between those attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Behaviour when a tick fires during a running cycle
    pub overlap_policy: OverlapPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            retry_attempts: 3,
            retry_delay_ms: 5_000,
            overlap_policy: OverlapPolicy::Skip,
        }
    }
}

/// URL layout of the telemetry API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStyle {
    /// `<base>?id=<channel>&auth_key=<key>`
    #[default]
    Query,
    /// `<base>/channels/<channel>?api_key=<key>`
    Path,
}

impl std::str::FromStr for UrlStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "query" => Ok(Self::Query),
            "path" => Ok(Self::Path),
            other => Err(Error::config(format!(
                "invalid url style '{other}', expected 'query' or 'path'"
            ))),
        }
    }
}

/// Remote telemetry API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the telemetry API
    pub base_url: String,

    /// URL layout
    pub url_style: UrlStyle,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:3000/api/channel"),
            url_style: UrlStyle::Query,
            timeout_ms: 5_000,
        }
    }
}

/// Batch replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum rows per batch
    pub batch_size: usize,

    /// Initial cursor when not resuming from the destination
    pub start_after: i64,

    /// Recompute the cursor from `MAX(entry_id)` on the destination at startup
    pub resume_from_destination: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            start_after: 0,
            resume_from_destination: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Source database (feed rows)
    pub source_url: String,

    /// Destination database (channels, replicated feeds, audit log)
    pub destination_url: String,

    /// Maximum pool size per database
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            source_url: String::from("postgresql://localhost/telemetry"),
            destination_url: String::from("postgresql://localhost/feedsync"),
            pool_size: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.collector.interval_ms == 0 {
            return Err(Error::config("collector.interval_ms must be greater than 0"));
        }

        if self.api.timeout_ms == 0 {
            return Err(Error::config("api.timeout_ms must be greater than 0"));
        }

        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(Error::config(format!(
                "api.base_url is not a valid URL: {}",
                self.api.base_url
            )));
        }

        if self.sync.batch_size == 0 {
            return Err(Error::config("sync.batch_size must be greater than 0"));
        }

        if self.sync.start_after < 0 {
            return Err(Error::config("sync.start_after must not be negative"));
        }

        if self.database.pool_size == 0 {
            return Err(Error::config("database.pool_size must be greater than 0"));
        }

        Ok(())
    }

    /// Poll interval as Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.collector.interval_ms)
    }

    /// Base retry delay as Duration
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.collector.retry_delay_ms)
    }

    /// API request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }
}

// ============================================================================
// Config sources
// ============================================================================

/// A place configuration can be loaded from
pub trait ConfigSource {
    /// Produce a configuration
    fn load(&self) -> Result<Config>;

    /// Check a loaded configuration
    fn validate(&self, config: &Config) -> Result<()> {
        config.validate()
    }

    /// Load and validate in one step
    fn load_validated(&self) -> Result<Config> {
        let config = self.load()?;
        self.validate(&config)?;
        Ok(config)
    }
}

/// Reads `FEEDSYNC_*` environment variables on top of the defaults
#[derive(Debug, Clone, Default)]
pub struct EnvConfigSource;

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(v) = env_parse("FEEDSYNC_INTERVAL_MS")? {
            config.collector.interval_ms = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_RETRY_ATTEMPTS")? {
            config.collector.retry_attempts = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_RETRY_DELAY_MS")? {
            config.collector.retry_delay_ms = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_OVERLAP_POLICY")? {
            config.collector.overlap_policy = v;
        }

        if let Ok(v) = std::env::var("FEEDSYNC_API_URL") {
            config.api.base_url = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_API_URL_STYLE")? {
            config.api.url_style = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_API_TIMEOUT_MS")? {
            config.api.timeout_ms = v;
        }

        if let Some(v) = env_parse("FEEDSYNC_BATCH_SIZE")? {
            config.sync.batch_size = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_START_AFTER")? {
            config.sync.start_after = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_RESUME_FROM_DESTINATION")? {
            config.sync.resume_from_destination = v;
        }

        if let Ok(v) = std::env::var("FEEDSYNC_SOURCE_URL") {
            config.database.source_url = v;
        }
        if let Ok(v) = std::env::var("FEEDSYNC_DESTINATION_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
        {
            config.database.destination_url = v;
        }
        if let Some(v) = env_parse("FEEDSYNC_POOL_SIZE")? {
            config.database.pool_size = v;
        }

        if let Ok(v) = std::env::var("FEEDSYNC_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("FEEDSYNC_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }
}

/// Reads a TOML file; missing keys fall back to defaults
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    /// Create a source for the given file
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path this source reads
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Config> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {e}",
                self.path.display()
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "failed to parse TOML config file {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), Duration::from_millis(10_000));
        assert_eq!(config.request_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.sync.batch_size, 1000);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.collector.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = Config::default();
        config.api.base_url = String::from("not a url");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_overlap_policy_from_str() {
        assert_eq!("skip".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::Skip);
        assert_eq!("QUEUE".parse::<OverlapPolicy>().unwrap(), OverlapPolicy::Queue);
        assert!("later".parse::<OverlapPolicy>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [collector]
            interval_ms = 2500
            overlap_policy = "queue"

            [api]
            url_style = "path"
            "#,
        )
        .unwrap();

        assert_eq!(config.collector.interval_ms, 2500);
        assert_eq!(config.collector.overlap_policy, OverlapPolicy::Queue);
        assert_eq!(config.collector.retry_attempts, 3);
        assert_eq!(config.api.url_style, UrlStyle::Path);
        assert_eq!(config.api.timeout_ms, 5_000);
        assert_eq!(config.sync.batch_size, 1000);
    }
}
