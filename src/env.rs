use std::env;
use std::str::FromStr;

use dotenv::dotenv;

use crate::config::ConnectionSettings;
use crate::rabbitmq::errors::ConfigError;
use crate::rabbitmq::options::RetryLimit;

/// Connection settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub amqp_addr: String,
    pub heartbeat_seconds: u16,
    pub connect_timeout_seconds: u64,
    pub retry_limit: i64,
    pub retry_pause_ms: u64,
}

fn default_heartbeat_seconds() -> u16 {
    5
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_retry_limit() -> i64 {
    -1
}

fn default_retry_pause_ms() -> u64 {
    1000
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `load` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(EnvConfig {
            amqp_addr: lookup("AMQP_ADDR").ok_or(env::VarError::NotPresent).map_err(|e| {
                ConfigError::MissingVar(format!("AMQP_ADDR: {}", e))
            })?,
            heartbeat_seconds: parse_or(&lookup, "RABBITMQ_HEARTBEAT_SECONDS", default_heartbeat_seconds)?,
            connect_timeout_seconds: parse_or(
                &lookup,
                "RABBITMQ_CONNECT_TIMEOUT_SECONDS",
                default_connect_timeout_seconds,
            )?,
            retry_limit: parse_or(&lookup, "RABBITMQ_RETRY_LIMIT", default_retry_limit)?,
            retry_pause_ms: parse_or(&lookup, "RABBITMQ_RETRY_PAUSE_MS", default_retry_pause_ms)?,
        })
    }

    pub fn into_settings(self) -> ConnectionSettings {
        ConnectionSettings {
            uri: self.amqp_addr,
            connection_timeout_ms: self.connect_timeout_seconds.saturating_mul(1000),
            heartbeat_seconds: self.heartbeat_seconds,
            retry_limit: RetryLimit::from(self.retry_limit),
            retry_pause_ms: self.retry_pause_ms,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: fn() -> T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val.trim().parse().map_err(|e| ConfigError::invalid_value(key, e)),
        None => Ok(default()),
    }
}
