//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Tunables for the publisher and consumer loops.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum messages claimed per publisher batch.
    pub batch_size: usize,
    /// Fixed wait after an empty batch.
    pub idle_backoff: Duration,
    /// Wait after an infrastructure failure (store or broker).
    pub error_backoff: Duration,
    /// Exchange the publisher sends to.
    pub publish_exchange: String,
    /// Queue the consumer reads delivery results from.
    pub result_queue: String,
    /// How many times a result for a still-PENDING message is rechecked.
    pub ack_recheck_attempts: u32,
    pub ack_recheck_delay: Duration,
    /// Extra attempts for a store write that failed with an infrastructure error.
    pub store_retry_attempts: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    OutOfRange(String),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            idle_backoff: Duration::from_millis(500),
            error_backoff: Duration::from_secs(2),
            publish_exchange: "notifications".to_string(),
            result_queue: "notification-results".to_string(),
            ack_recheck_attempts: 3,
            ack_recheck_delay: Duration::from_millis(100),
            store_retry_attempts: 3,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                |
    /// |---------------------------------|------------------------|
    /// | `COURIER_BATCH_SIZE`            | `50`                   |
    /// | `COURIER_IDLE_BACKOFF_MS`       | `500`                  |
    /// | `COURIER_ERROR_BACKOFF_MS`      | `2000`                 |
    /// | `COURIER_PUBLISH_EXCHANGE`      | `notifications`        |
    /// | `COURIER_RESULT_QUEUE`          | `notification-results` |
    /// | `COURIER_ACK_RECHECK_ATTEMPTS`  | `3`                    |
    /// | `COURIER_ACK_RECHECK_DELAY_MS`  | `100`                  |
    /// | `COURIER_STORE_RETRY_ATTEMPTS`  | `3`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            batch_size: parse_or(&lookup, "COURIER_BATCH_SIZE", defaults.batch_size)?,
            idle_backoff: millis_or(&lookup, "COURIER_IDLE_BACKOFF_MS", defaults.idle_backoff)?,
            error_backoff: millis_or(&lookup, "COURIER_ERROR_BACKOFF_MS", defaults.error_backoff)?,
            publish_exchange: lookup("COURIER_PUBLISH_EXCHANGE")
                .unwrap_or(defaults.publish_exchange),
            result_queue: lookup("COURIER_RESULT_QUEUE").unwrap_or(defaults.result_queue),
            ack_recheck_attempts: parse_or(
                &lookup,
                "COURIER_ACK_RECHECK_ATTEMPTS",
                defaults.ack_recheck_attempts,
            )?,
            ack_recheck_delay: millis_or(
                &lookup,
                "COURIER_ACK_RECHECK_DELAY_MS",
                defaults.ack_recheck_delay,
            )?,
            store_retry_attempts: parse_or(
                &lookup,
                "COURIER_STORE_RETRY_ATTEMPTS",
                defaults.store_retry_attempts,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::OutOfRange(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.idle_backoff.is_zero() {
            // 0 だと空のバッチで busy-spin になる
            return Err(ConfigError::OutOfRange(
                "idle_backoff must be greater than zero".to_string(),
            ));
        }
        if self.publish_exchange.trim().is_empty() || self.result_queue.trim().is_empty() {
            return Err(ConfigError::OutOfRange(
                "exchange and queue names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected: std::any::type_name::<T>(),
            value,
        }),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}
