// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use thiserror::Error;

/// Rejected configuration. Returned before any network activity and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Broker url must not be empty")]
    EmptyUrl,

    #[error("Broker url must use the amqp:// or amqps:// scheme: {0}")]
    InvalidUrl(String),

    #[error("Exchange name must not be empty")]
    EmptyExchangeName,

    #[error("Invalid exchange kind '{0}', expected one of direct, topic, fanout, headers")]
    InvalidExchangeKind(String),

    #[error("Environment variable error: {0}")]
    MissingVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to RabbitMQ: {0}")]
    Dial(String),

    #[error("Invalid AMQP uri: {0}")]
    InvalidUri(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Failed to open channel: {0}")]
    OpenFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeDeclareError {
    #[error("Exchange '{exchange}' declaration rejected: {reason}")]
    Rejected { exchange: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RabbitMQError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("RabbitMQ connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("RabbitMQ channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("RabbitMQ exchange error: {0}")]
    ExchangeDeclare(#[from] ExchangeDeclareError),

    #[error("Supervisor task failed: {0}")]
    Supervisor(String),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

impl From<LapinError> for ConnectionError {
    fn from(error: LapinError) -> Self {
        ConnectionError::Dial(error.to_string())
    }
}

impl From<LapinError> for ChannelError {
    fn from(error: LapinError) -> Self {
        match error {
            LapinError::InvalidConnectionState(_) => ChannelError::ConnectionClosed,
            other => ChannelError::OpenFailed(other.to_string()),
        }
    }
}

impl From<std::env::VarError> for ConfigError {
    fn from(err: std::env::VarError) -> Self {
        ConfigError::MissingVar(err.to_string())
    }
}

impl ConfigError {
    pub(crate) fn invalid_value(key: &str, err: impl std::fmt::Display) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}
