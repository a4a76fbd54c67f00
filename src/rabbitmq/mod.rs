// src/rabbitmq/mod.rs
// Resilient RabbitMQ connection management

pub mod connection;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod lapin_transport;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod observer;
pub mod options;
pub mod supervisor;
pub mod transport;
pub mod validation;

// Re-export specific items to simplify imports elsewhere
pub use connection::{dial, ConnectionManager, LiveConnection};
pub use errors::{ChannelError, ConfigError, ConnectionError, ExchangeDeclareError, RabbitMQError, Result};
pub use events::{BlockedEvent, CloseEvent, ConnectionEvent, ExchangeDeclareLog, RetryEvent};
pub use exchange::ExchangeDeclarer;
pub use lapin_transport::{LapinConnection, LapinConnector};
pub use observer::{CallbackObserver, ConnectionObserver, EventChannelObserver, NoopObserver, ObserverSet, TracingObserver};
pub use options::{redact_url, ExchangeKind, ExchangeSpec, RabbitConfig, RetryLimit};
pub use supervisor::{SupervisorExit, SupervisorState};
pub use transport::{BrokerChannel, BrokerConnection, CloseDetail, ConnectionSignal, Connector, DialOptions};
