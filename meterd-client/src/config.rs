//! Client configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{ClientError, ClientResult};

/// How events travel from the application to the metering service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// POST each event and await the response; retry with backoff.
    Sync,
    /// Fire-and-forget; failures fall back to the local buffer.
    Async,
    /// Buffer locally; a background worker drains batches on a timer.
    Batch,
}

impl FromStr for TransportMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(TransportMode::Sync),
            "async" => Ok(TransportMode::Async),
            "batch" => Ok(TransportMode::Batch),
            other => Err(ClientError::Config {
                message: format!("unknown transport mode '{other}'"),
            }),
        }
    }
}

/// Configuration for the metering client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the metering service
    pub api_url: String,

    /// API key sent as `X-API-Key` (empty disables the header)
    pub api_key: String,

    /// Transport mode for emitted events
    pub transport_mode: TransportMode,

    /// Events per batch POST
    pub batch_size: usize,

    /// Interval between batch worker drains
    pub batch_interval: Duration,

    /// Attempts for the synchronous transport
    pub retry_max_attempts: u32,

    /// Per-request timeout (batch POSTs use twice this)
    pub timeout: Duration,

    /// Local buffer capacity
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            transport_mode: TransportMode::Async,
            batch_size: 100,
            batch_interval: Duration::from_secs(5),
            retry_max_attempts: 3,
            timeout: Duration::from_secs(5),
            queue_capacity: 10_000,
        }
    }
}

impl ClientConfig {
    /// Load from `METERING_*` environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> ClientResult<Self> {
        let defaults = ClientConfig::default();

        Ok(Self {
            api_url: env::var("METERING_API_URL").unwrap_or(defaults.api_url),
            api_key: env::var("METERING_API_KEY").unwrap_or(defaults.api_key),
            transport_mode: match env::var("METERING_TRANSPORT_MODE") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.transport_mode,
            },
            batch_size: parse_var("METERING_BATCH_SIZE", defaults.batch_size)?,
            batch_interval: Duration::from_secs(parse_var(
                "METERING_BATCH_INTERVAL_SECONDS",
                defaults.batch_interval.as_secs(),
            )?),
            retry_max_attempts: parse_var(
                "METERING_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            timeout: Duration::from_secs(parse_var(
                "METERING_TIMEOUT",
                defaults.timeout.as_secs(),
            )?),
            queue_capacity: defaults.queue_capacity,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> ClientResult<T> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ClientError::Config {
            message: format!("invalid value for {name}: '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.transport_mode, TransportMode::Async);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.batch_interval, Duration::from_secs(5));
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 10_000);
    }

    #[test]
    fn transport_mode_parses_known_values_only() {
        assert_eq!("sync".parse::<TransportMode>().unwrap(), TransportMode::Sync);
        assert_eq!("async".parse::<TransportMode>().unwrap(), TransportMode::Async);
        assert_eq!("batch".parse::<TransportMode>().unwrap(), TransportMode::Batch);
        assert!("fire".parse::<TransportMode>().is_err());
    }
}
