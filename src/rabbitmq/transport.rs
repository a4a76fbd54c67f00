// src/rabbitmq/transport.rs

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::{ChannelError, ConnectionError, ExchangeDeclareError};
use super::options::{ExchangeDeclaration, RabbitConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT};

/// Everything a connector needs to open one broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialOptions {
    pub url: String,
    pub heartbeat: Duration,
    pub connect_timeout: Duration,
}

impl DialOptions {
    pub fn from_config(config: &RabbitConfig) -> Self {
        Self {
            url: config.url.clone(),
            heartbeat: if config.heartbeat.is_zero() {
                DEFAULT_HEARTBEAT
            } else {
                config.heartbeat
            },
            connect_timeout: if config.connect_timeout.is_zero() {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                config.connect_timeout
            },
        }
    }
}

/// Details of a connection closure, when the broker or the client library supplied any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseDetail {
    pub code: u16,
    pub server: bool,
    pub reason: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// `active` is false when the broker lifts an earlier block.
    Blocked { active: bool, reason: String },
    /// `None` for a clean close without error details.
    Closed(Option<CloseDetail>),
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    async fn connect(&self, options: &DialOptions) -> Result<Self::Connection, ConnectionError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn id(&self) -> Uuid;

    fn is_open(&self) -> bool;

    /// Waits for the next blocked or closed signal on this connection.
    ///
    /// Must be cancel safe: the supervisor drops the future on shutdown.
    async fn next_signal(&self) -> ConnectionSignal;

    async fn open_channel(&self) -> Result<Self::Channel, ChannelError>;

    /// Force-closes the connection. Closing an already closed connection is a no-op.
    async fn close(&self);
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), ExchangeDeclareError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_options_default_heartbeat() {
        let options = DialOptions::from_config(&RabbitConfig::new("amqp://localhost"));
        assert_eq!(options.heartbeat, Duration::from_secs(5));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));

        let config = RabbitConfig::new("amqp://localhost").with_heartbeat(Duration::from_secs(60));
        assert_eq!(DialOptions::from_config(&config).heartbeat, Duration::from_secs(60));
    }
}
