//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values. The webhook URL
//! is wrapped in secrecy::SecretString to keep it out of logs.

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

/// Default bounded channel capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default pause between two processed items.
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_secs(2);
/// Default metric namespace.
pub const DEFAULT_NAMESPACE: &str = "pulse";

#[derive(Debug)]
pub struct Config {
    pub queue_capacity: usize,
    pub item_delay: Duration,
    pub metrics_namespace: String,
    pub webhook_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue_capacity: parsed_var("PULSE_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            item_delay: parsed_var::<u64>("PULSE_QUEUE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_ITEM_DELAY),
            metrics_namespace: std::env::var("PULSE_METRICS_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            webhook_url: std::env::var("PULSE_WEBHOOK_URL").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Queue settings derived from this configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            item_delay: self.item_delay,
            namespace: self.metrics_namespace.clone(),
        }
    }
}

/// Construction-time queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of items waiting in the channel.
    pub capacity: usize,
    /// Pause after each processed item, throttling downstream calls.
    pub item_delay: Duration,
    /// Prefix for every queue instrument name.
    pub namespace: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            item_delay: DEFAULT_ITEM_DELAY,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_accepts_padded_numbers() {
        let n: usize = parse_value("X", " 42 ").unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn parse_value_names_the_variable() {
        let err = parse_value::<u64>("PULSE_QUEUE_DELAY_MS", "soon").unwrap_err();
        assert!(err.to_string().contains("PULSE_QUEUE_DELAY_MS"));
    }

    #[test]
    fn default_queue_config() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.item_delay, Duration::from_secs(2));
        assert_eq!(config.namespace, "pulse");
    }
}
