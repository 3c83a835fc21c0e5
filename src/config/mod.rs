//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The Redis URL may carry a password, so it is held as a `SecretString`.

pub mod secrets;

use crate::error::{Error, Result};
use crate::queue::{DEFAULT_MAX_TRIES, QueueConfig};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    pub queue_name: String,
    pub max_tries: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: SecretString::from(required_var("REDIS_URL")?),
            queue_name: required_var("QUEUE_NAME")?,
            max_tries: parse_max_tries(std::env::var("QUEUE_MAX_TRIES").ok())?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Queue construction parameters derived from this config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(&self.queue_name).max_tries(self.max_tries)
    }
}

fn required_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

fn parse_max_tries(raw: Option<String>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_MAX_TRIES);
    };
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "QUEUE_MAX_TRIES must be a positive integer, got {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tries_defaults_when_unset() {
        assert_eq!(parse_max_tries(None).unwrap(), 3);
    }

    #[test]
    fn max_tries_parses() {
        assert_eq!(parse_max_tries(Some(" 5 ".to_string())).unwrap(), 5);
    }

    #[test]
    fn max_tries_rejects_zero_and_garbage() {
        assert!(parse_max_tries(Some("0".to_string())).is_err());
        assert!(parse_max_tries(Some("three".to_string())).is_err());
        assert!(parse_max_tries(Some("-1".to_string())).is_err());
    }
}
