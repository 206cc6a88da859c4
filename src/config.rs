//! Configuration types for chunk-dl

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration for [`DownloadManager`](crate::DownloadManager)
///
/// Every field has a default, so `Config::default()` and an empty JSON object both
/// produce a working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool, chunking and reporting settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry budget and backoff between attempts
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check the configuration for values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(config_error(
                "max_concurrent_downloads must be at least 1",
                "max_concurrent_downloads",
            ));
        }
        if self.download.default_chunks == 0 {
            return Err(config_error(
                "default_chunks must be at least 1",
                "default_chunks",
            ));
        }
        if self.download.block_size == 0 {
            return Err(config_error("block_size must be at least 1", "block_size"));
        }
        if self.download.progress_interval_ms == 0 {
            return Err(config_error(
                "progress_interval_ms must be at least 1",
                "progress_interval_ms",
            ));
        }
        if self.download.event_buffer == 0 {
            return Err(config_error(
                "event_buffer must be at least 1",
                "event_buffer",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be a finite number >= 1.0",
                "backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Worker pool and per-task execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum tasks running at once (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Chunks per task when the request does not set one (default: 4)
    #[serde(default = "default_chunks")]
    pub default_chunks: usize,

    /// Bytes per part-file write and per merge copy (default: 4096)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Interval between progress events in milliseconds (default: 500)
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Capacity of the broadcast event channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl DownloadConfig {
    /// Progress reporting interval as a Duration
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            default_chunks: default_chunks(),
            block_size: default_block_size(),
            progress_interval_ms: default_progress_interval_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Overall per-request timeout (default: none, large chunks may stream for a long time)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
        }
    }
}

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts that may be retried before a task settles at failed (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

fn default_chunks() -> usize {
    4
}

fn default_block_size() -> usize {
    4096
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    1000
}

fn default_user_agent() -> String {
    format!("chunk-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Durations are stored as seconds: whole values as integers, sub-second
// values as fractional seconds (0.25 = 250 ms)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) if d.subsec_nanos() == 0 => serializer.serialize_some(&d.as_secs()),
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
