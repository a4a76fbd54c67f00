// src/rabbitmq/connection.rs

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use super::errors::{ConnectionError, RabbitMQError, Result};
use super::exchange::ExchangeDeclarer;
use super::options::{redact_url, ExchangeSpec, RabbitConfig};
use super::supervisor::{Supervisor, SupervisorExit, SupervisorState};
use super::transport::{BrokerConnection, Connector, DialOptions};
use super::validation::validate_connection_config;

/// Opens one connection, bounded by the configured connect timeout.
pub async fn dial<C: Connector>(connector: &C, config: &RabbitConfig) -> std::result::Result<C::Connection, ConnectionError> {
    let options = DialOptions::from_config(config);
    debug!(url = %redact_url(&options.url), heartbeat = ?options.heartbeat, "Dialing RabbitMQ");

    match timeout(options.connect_timeout, connector.connect(&options)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(options.connect_timeout)),
    }
}

/// Guarded cell holding the connection currently in use.
///
/// The supervisor is the only writer. Readers get their own `Arc`, so a swap
/// never pulls a connection out from under them.
pub struct LiveConnection<T> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for LiveConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LiveConnection<T> {
    pub fn new(connection: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(connection))),
        }
    }

    pub fn current(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Installs `next` and hands back the connection it replaced.
    pub(crate) fn replace(&self, next: T) -> Arc<T> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

/// Owns a broker connection and the supervisor task that keeps it alive.
pub struct ConnectionManager<C: Connector> {
    config: Arc<RabbitConfig>,
    live: LiveConnection<C::Connection>,
    state: watch::Receiver<SupervisorState>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<SupervisorExit>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Validates `config`, dials once and starts the supervisor.
    ///
    /// A failed initial dial is returned to the caller and is not retried.
    pub async fn connect(connector: C, config: RabbitConfig) -> Result<Self> {
        let config = Arc::new(validate_connection_config(config)?);
        info!(url = %redact_url(&config.url), "Attempting to connect to RabbitMQ");

        let connection = dial(&connector, &config).await?;
        info!(connection_id = %connection.id(), "Successfully connected to RabbitMQ");

        let live = LiveConnection::new(connection);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SupervisorState::Watching);

        let supervisor = Supervisor::new(
            Arc::new(connector),
            Arc::clone(&config),
            live.clone(),
            state_tx,
            shutdown_rx,
        );
        let supervisor = tokio::spawn(supervisor.run());

        Ok(Self {
            config,
            live,
            state: state_rx,
            shutdown: shutdown_tx,
            supervisor,
        })
    }

    pub fn config(&self) -> &RabbitConfig {
        &self.config
    }

    pub fn connection(&self) -> Arc<C::Connection> {
        self.live.current()
    }

    pub fn live(&self) -> LiveConnection<C::Connection> {
        self.live.clone()
    }

    pub fn is_open(&self) -> bool {
        self.live.current().is_open()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    pub fn declarer(&self) -> ExchangeDeclarer<C::Connection> {
        ExchangeDeclarer::new(self.live.clone(), redact_url(&self.config.url))
    }

    pub async fn declare_exchange(&self, spec: ExchangeSpec) -> Result<()> {
        self.declarer().declare(spec).await
    }

    /// Stops the supervisor and closes the live connection.
    ///
    /// Returns how the supervisor ended: `Cancelled` here, or `Exhausted`
    /// when it had already given up.
    pub async fn shutdown(self) -> Result<SupervisorExit> {
        let _ = self.shutdown.send(true);
        let exit = self
            .supervisor
            .await
            .map_err(|e| RabbitMQError::Supervisor(e.to_string()))?;

        info!("Closing RabbitMQ connection gracefully");
        self.live.current().close().await;
        Ok(exit)
    }
}
