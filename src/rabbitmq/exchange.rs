// src/rabbitmq/exchange.rs

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::connection::LiveConnection;
use super::errors::{ExchangeDeclareError, Result};
use super::events::ExchangeDeclareLog;
use super::options::ExchangeSpec;
use super::transport::{BrokerChannel, BrokerConnection};
use super::validation::validate_exchange_spec;

/// Declares exchanges on whatever connection is currently live.
pub struct ExchangeDeclarer<T: BrokerConnection> {
    live: LiveConnection<T>,
    broker_url: String,
}

impl<T: BrokerConnection> ExchangeDeclarer<T> {
    pub fn new(live: LiveConnection<T>, broker_url: impl Into<String>) -> Self {
        Self {
            live,
            broker_url: broker_url.into(),
        }
    }

    /// Declares the exchange `retry_count` times, pausing `retry_pause` after each iteration.
    ///
    /// The loop does not stop at the first success: a declaration that
    /// succeeds immediately is still repeated (it is idempotent on the
    /// broker) and every iteration is followed by the pause. The result is
    /// the outcome of the last iteration that reached the broker. Iterations
    /// run while the connection is closed are skipped but still paused.
    ///
    /// A run in which no iteration reached the broker (the connection closed
    /// after the channel was opened) returns `Ok(())` even though nothing was
    /// declared.
    ///
    /// An invalid spec is rejected before any channel is opened.
    pub async fn declare(&self, spec: ExchangeSpec) -> Result<()> {
        let declaration = validate_exchange_spec(spec)?;
        let connection = self.live.current();
        let channel = connection.open_channel().await?;

        info!(
            exchange = %declaration.name,
            kind = %declaration.kind,
            iterations = declaration.retry_count,
            "Declaring exchange"
        );

        let mut outcome: std::result::Result<(), ExchangeDeclareError> = Ok(());
        for iteration in 1..=declaration.retry_count {
            if connection.is_open() {
                outcome = channel.declare_exchange(&declaration).await;
                if let Err(err) = &outcome {
                    warn!(exchange = %declaration.name, iteration, "Exchange declaration failed: {}", err);
                    let log = ExchangeDeclareLog::new(declaration.snapshot(&self.broker_url), err.clone());
                    (declaration.on_declare_attempt)(&log);
                }
            } else {
                debug!(exchange = %declaration.name, iteration, "Connection closed, skipping declaration");
            }
            sleep(declaration.retry_pause).await;
        }

        outcome.map_err(Into::into)
    }
}
