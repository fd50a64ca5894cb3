use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const CURRENT_CONFIG_VERSION: u32 = 1;

/// Slowest accepted refill rate: one request every 1000 seconds.
pub const MIN_RATE_LIMIT_PER_SECOND: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ncloud: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            ncloud: ProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings the host hands to the provider at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: f64,
    /// Bucket capacity; defaults to the per-second rate rounded up.
    #[serde(default)]
    pub rate_limit_burst: Option<u32>,
    /// Longest a call waits for a rate-limit token before failing.
    #[serde(default = "default_rate_limit_wait_ms")]
    pub rate_limit_wait_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: LoginConfig,
    /// Audio quality level requested when resolving stream URLs.
    #[serde(default = "default_stream_level")]
    pub stream_level: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            rate_limit_per_second: default_rate_limit_per_second(),
            rate_limit_burst: None,
            rate_limit_wait_ms: default_rate_limit_wait_ms(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
            login: LoginConfig::default(),
            stream_level: default_stream_level(),
        }
    }
}

impl ProviderConfig {
    /// Convenience constructor for the three host-supplied essentials.
    pub fn new(
        api_base_url: impl Into<String>,
        request_timeout_ms: u64,
        rate_limit_per_second: f64,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout_ms,
            rate_limit_per_second,
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    pub fn rate_limit_capacity(&self) -> u32 {
        self.rate_limit_burst
            .unwrap_or_else(|| self.rate_limit_per_second.ceil() as u32)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = Url::parse(&self.api_base_url).map_err(|e| ValidationError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "request_timeout_ms",
            });
        }
        if !self.rate_limit_per_second.is_finite()
            || self.rate_limit_per_second < MIN_RATE_LIMIT_PER_SECOND
        {
            return Err(ValidationError::InvalidRateLimit {
                value: self.rate_limit_per_second,
            });
        }
        if self.rate_limit_burst == Some(0) {
            return Err(ValidationError::ZeroValue {
                field: "rate_limit_burst",
            });
        }
        if self.login.poll_interval_ms == 0 {
            return Err(ValidationError::ZeroValue {
                field: "login.poll_interval_ms",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_detail_ttl_secs")]
    pub detail_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            search_ttl_secs: default_search_ttl_secs(),
            detail_ttl_secs: default_detail_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key under which the host storage keeps the persisted session.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_ticket_ttl_secs")]
    pub ticket_ttl_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            ticket_ttl_secs: default_ticket_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("invalid api_base_url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("rate_limit_per_second must be a finite value of at least 0.001, got {value}")]
    InvalidRateLimit { value: f64 },
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        self.ncloud.validate()
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_api_base_url() -> String {
    "http://localhost:3000".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rate_limit_per_second() -> f64 {
    5.0
}

fn default_rate_limit_wait_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_cache_capacity() -> u64 {
    512
}

fn default_search_ttl_secs() -> u64 {
    15 * 60
}

fn default_detail_ttl_secs() -> u64 {
    60 * 60
}

fn default_storage_key() -> String {
    "ncloud/session".into()
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_ticket_ttl_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_stream_level() -> String {
    "exhigh".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.stdout);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.ncloud.retry.max_retries, 3);
        assert_eq!(config.ncloud.session.refresh_margin_secs, 60);
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn provider_section_parses_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [ncloud]
            api_base_url = "http://192.168.1.100:4001"
            request_timeout_ms = 2500
            rate_limit_per_second = 2.5

            [ncloud.cache]
            search_ttl_secs = 30
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ncloud.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.ncloud.rate_limit_capacity(), 3);
        assert_eq!(config.ncloud.cache.search_ttl_secs, 30);
        assert_eq!(config.ncloud.cache.detail_ttl_secs, 3600);
    }

    #[test]
    fn rejects_bad_provider_settings() {
        let bad_url = ProviderConfig::new("not a url", 1000, 1.0);
        assert!(matches!(
            bad_url.validate(),
            Err(ValidationError::InvalidBaseUrl { .. })
        ));

        let ftp = ProviderConfig::new("ftp://example.com", 1000, 1.0);
        assert!(matches!(
            ftp.validate(),
            Err(ValidationError::InvalidBaseUrl { .. })
        ));

        let no_timeout = ProviderConfig::new("http://example.com", 0, 1.0);
        assert_eq!(
            no_timeout.validate(),
            Err(ValidationError::ZeroValue {
                field: "request_timeout_ms"
            })
        );

        for rate in [0.0, 1e-300, f64::NAN, f64::INFINITY] {
            let bad_rate = ProviderConfig::new("http://example.com", 1000, rate);
            assert!(matches!(
                bad_rate.validate(),
                Err(ValidationError::InvalidRateLimit { .. })
            ));
        }
        let slowest = ProviderConfig::new("http://example.com", 1000, MIN_RATE_LIMIT_PER_SECOND);
        assert_eq!(slowest.validate(), Ok(()));
    }
}
