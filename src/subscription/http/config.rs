use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration for query behavior.
///
/// This controls when cached data is considered stale and how long unused
/// entries survive.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long data is considered fresh after a fetch.
    ///
    /// `None` means data only goes stale through invalidation. When set, a new
    /// subscription to an entry older than this triggers a refetch. The entry
    /// reports `loading` without data until the refetch settles.
    pub stale_time: Option<Duration>,

    /// Grace period an entry survives after its last subscriber leaves.
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: None,
            cache_time: Duration::from_secs(60),
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Option<Duration>, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }
}

/// Bounded exponential backoff for transient read failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Upper bound of the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Settings for the [`RequestExecutor`](super::executor::RequestExecutor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// API root that endpoint paths are appended to.
    pub base_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ExecutorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// On-disk client configuration (TOML).
///
/// ```toml
/// api_base_url = "https://admin.example.com/api"
/// request_timeout_ms = 10000
///
/// [cache]
/// keep_unused_for_ms = 60000
/// stale_after_ms = 30000
///
/// [retry]
/// max_retries = 3
/// initial_backoff_ms = 200
/// max_backoff_ms = 5000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    pub keep_unused_for_ms: u64,
    #[serde(default)]
    pub stale_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (set STOREKEEP_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientSettings {
    /// Loads settings from the file named by `STOREKEEP_CONFIG`.
    ///
    /// Command-line handling is left to the binary; pass a path from there to
    /// [`from_path`](Self::from_path).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::var_os("STOREKEEP_CONFIG").map(PathBuf::from))
    }

    fn load_from(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.stale_after_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.stale_after_ms",
                reason: "must be > 0 when set".to_string(),
            });
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_backoff_ms",
                reason: "must be >= initial_backoff_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Splits the settings into executor and query configuration.
    #[must_use]
    pub fn into_parts(self) -> (ExecutorConfig, QueryConfig) {
        let retry = RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        };
        let executor = ExecutorConfig::new(self.api_base_url)
            .with_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_retry(retry);
        let query = QueryConfig::new(
            self.cache.stale_after_ms.map(Duration::from_millis),
            Duration::from_millis(self.cache.keep_unused_for_ms),
        );
        (executor, query)
    }
}
