//! TOML-driven host configuration.
//!
//! ```toml
//! [logging]
//! filter = "info,jobhost_core=debug"
//!
//! [queues]
//! batch_size = 16
//! max_polling_interval_ms = 60000
//! visibility_timeout_ms = 600000
//! max_dequeue_count = 5
//! ```

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::listener::delay::QueuePollingIntervals;

/// Largest batch a single dequeue may ask for.
pub const MAX_BATCH_SIZE: usize = 32;

/// Shortest visibility timeout a listener may dequeue with.
pub const MIN_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Messages requested per dequeue.
    pub batch_size: usize,

    /// Poll again once in-flight messages drop to this many.
    /// Defaults to `batch_size / 2`.
    pub new_batch_threshold: Option<usize>,

    pub max_polling_interval_ms: u64,

    /// Visibility timeout requested on dequeue and on each lease renewal.
    pub visibility_timeout_ms: u64,

    /// Deliveries allowed before a message is moved to the poison queue.
    pub max_dequeue_count: u32,

    /// When set, a failed message is made visible again after this delay
    /// instead of waiting out its lease.
    pub failed_visibility_timeout_ms: Option<u64>,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            new_batch_threshold: None,
            max_polling_interval_ms: QueuePollingIntervals::DEFAULT_MAXIMUM.as_millis() as u64,
            visibility_timeout_ms: 10 * 60 * 1000,
            max_dequeue_count: 5,
            failed_visibility_timeout_ms: None,
        }
    }
}

impl QueuesConfig {
    pub fn max_polling_interval(&self) -> Duration {
        Duration::from_millis(self.max_polling_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn new_batch_threshold(&self) -> usize {
        self.new_batch_threshold.unwrap_or(self.batch_size / 2)
    }

    pub fn failed_visibility_timeout(&self) -> Option<Duration> {
        self.failed_visibility_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(HostError::InvalidConfig(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE} (got {})",
                self.batch_size
            )));
        }
        if self.max_dequeue_count == 0 {
            return Err(HostError::InvalidConfig(
                "max_dequeue_count must be at least 1".to_string(),
            ));
        }
        if self.max_polling_interval() < QueuePollingIntervals::MINIMUM {
            return Err(HostError::InvalidConfig(format!(
                "max_polling_interval_ms must be at least {} (got {})",
                QueuePollingIntervals::MINIMUM.as_millis(),
                self.max_polling_interval_ms
            )));
        }
        if self.visibility_timeout() < MIN_VISIBILITY_TIMEOUT {
            return Err(HostError::InvalidConfig(format!(
                "visibility_timeout_ms must be at least {} (got {})",
                MIN_VISIBILITY_TIMEOUT.as_millis(),
                self.visibility_timeout_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    pub logging: LoggingConfig,
    pub queues: QueuesConfig,
}

impl HostConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, HostError> {
        let config: HostConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HostError> {
        self.queues.validate()
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HostConfig, HostError> {
    let raw: String = fs::read_to_string(path)?;
    HostConfig::from_toml_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = HostConfig::default();
        config.validate().unwrap();

        assert_eq!(config.queues.batch_size, 16);
        assert_eq!(config.queues.new_batch_threshold(), 8);
        assert_eq!(config.queues.max_dequeue_count, 5);
        assert_eq!(config.queues.max_polling_interval(), Duration::from_secs(60));
        assert_eq!(config.queues.visibility_timeout(), Duration::from_secs(600));
        assert_eq!(config.queues.failed_visibility_timeout(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HostConfig::from_toml_str(
            r#"
            [queues]
            batch_size = 4
            max_dequeue_count = 3
            failed_visibility_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.queues.batch_size, 4);
        assert_eq!(config.queues.new_batch_threshold(), 2);
        assert_eq!(config.queues.max_dequeue_count, 3);
        assert_eq!(config.queues.failed_visibility_timeout(), Some(Duration::ZERO));
        assert_eq!(config.logging.filter, "info");
    }

    #[rstest]
    #[case::zero_batch("[queues]\nbatch_size = 0")]
    #[case::huge_batch("[queues]\nbatch_size = 33")]
    #[case::zero_dequeue_count("[queues]\nmax_dequeue_count = 0")]
    #[case::polling_below_minimum("[queues]\nmax_polling_interval_ms = 10")]
    #[case::short_visibility("[queues]\nvisibility_timeout_ms = 500")]
    fn invalid_values_are_rejected(#[case] raw: &str) {
        let err = HostConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig(_)), "{err}");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = HostConfig::from_toml_str("[queues\nbatch_size = 4").unwrap_err();
        assert!(matches!(err, HostError::ConfigParse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config("/definitely/not/here/jobhost.toml").unwrap_err();
        assert!(matches!(err, HostError::Io(_)));
    }
}
