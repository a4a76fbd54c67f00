// src/rabbitmq/supervisor.rs
// Background task that watches the live connection and drives recovery.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::connection::{dial, LiveConnection};
use super::events::{BlockedEvent, CloseEvent, RetryEvent};
use super::options::{redact_url, RabbitConfig, RetryLimit};
use super::transport::{BrokerConnection, ConnectionSignal, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Watching,
    /// `attempt` counts the failed dials of the current cycle.
    Reconnecting { attempt: u32 },
    Terminated,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Blocked, unblocked or closed: the connection has been dropped.
    Signalled,
    DialFailed,
    DialSucceeded,
}

impl SupervisorState {
    pub fn next(self, transition: Transition, limit: RetryLimit) -> SupervisorState {
        match (self, transition) {
            (SupervisorState::Terminated, _) => SupervisorState::Terminated,
            (SupervisorState::Watching, Transition::Signalled) => SupervisorState::Reconnecting { attempt: 0 },
            (SupervisorState::Reconnecting { attempt }, Transition::DialFailed) => {
                let attempt = attempt.saturating_add(1);
                if limit.is_exhausted(attempt) {
                    SupervisorState::Terminated
                } else {
                    SupervisorState::Reconnecting { attempt }
                }
            }
            (SupervisorState::Reconnecting { .. }, Transition::DialSucceeded) => SupervisorState::Watching,
            (state, _) => state,
        }
    }
}

/// How the supervisor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The retry limit was used up; `on_terminal` has fired.
    Exhausted,
    /// Shutdown was requested or the owning manager went away.
    Cancelled,
}

pub struct Supervisor<C: Connector> {
    connector: Arc<C>,
    config: Arc<RabbitConfig>,
    live: LiveConnection<C::Connection>,
    state: watch::Sender<SupervisorState>,
    shutdown: watch::Receiver<bool>,
    broker_url: String,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: Arc<C>,
        config: Arc<RabbitConfig>,
        live: LiveConnection<C::Connection>,
        state: watch::Sender<SupervisorState>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let broker_url = redact_url(&config.url);
        Self {
            connector,
            config,
            live,
            state,
            shutdown,
            broker_url,
        }
    }

    pub async fn run(mut self) -> SupervisorExit {
        let mut state = SupervisorState::Watching;
        loop {
            self.state.send_replace(state);
            let transition = match state {
                SupervisorState::Watching => self.watch_connection().await,
                SupervisorState::Reconnecting { attempt } => self.reconnect(attempt).await,
                SupervisorState::Terminated => {
                    error!(url = %self.broker_url, "Max reconnection attempts reached. Giving up.");
                    self.config.observer.on_terminal();
                    return SupervisorExit::Exhausted;
                }
            };

            let Some(transition) = transition else {
                debug!(url = %self.broker_url, "Supervisor cancelled");
                return SupervisorExit::Cancelled;
            };
            let next = state.next(transition, self.config.retry_limit);
            debug!(?state, ?transition, ?next, "Supervisor transition");
            state = next;
        }
    }

    /// `None` means shutdown was requested.
    async fn watch_connection(&mut self) -> Option<Transition> {
        let connection = self.live.current();
        let signal = tokio::select! {
            signal = connection.next_signal() => signal,
            _ = cancelled(&mut self.shutdown) => return None,
        };

        match signal {
            ConnectionSignal::Blocked { active: true, reason } => {
                connection.close().await;
                self.config.observer.on_blocked(&BlockedEvent {
                    time: Utc::now(),
                    reason,
                    broker_url: self.broker_url.clone(),
                    connection_id: connection.id(),
                });
                Some(Transition::Signalled)
            }
            ConnectionSignal::Blocked { active: false, .. } => {
                connection.close().await;
                debug!(connection_id = %connection.id(), "Connection unblocked, dropping it anyway");
                Some(Transition::Signalled)
            }
            ConnectionSignal::Closed(detail) => {
                connection.close().await;
                if let Some(detail) = detail {
                    self.config.observer.on_close(&CloseEvent {
                        time: Utc::now(),
                        code: detail.code,
                        server: detail.server,
                        reason: detail.reason,
                        recoverable: detail.recoverable,
                        broker_url: self.broker_url.clone(),
                        connection_id: connection.id(),
                    });
                }
                Some(Transition::Signalled)
            }
        }
    }

    async fn reconnect(&mut self, attempt: u32) -> Option<Transition> {
        let number = attempt.saturating_add(1);
        info!(url = %self.broker_url, attempt = number, "Attempting to reconnect to RabbitMQ");

        let dialed = tokio::select! {
            dialed = dial(self.connector.as_ref(), &self.config) => dialed,
            _ = cancelled(&mut self.shutdown) => return None,
        };

        match dialed {
            Ok(connection) => {
                let id = connection.id();
                let _previous = self.live.replace(connection);
                self.config
                    .observer
                    .on_retry(&RetryEvent::succeeded(number, &self.broker_url, id));
                Some(Transition::DialSucceeded)
            }
            Err(err) => {
                warn!(url = %self.broker_url, attempt = number, "Failed to reconnect: {}", err);
                self.config
                    .observer
                    .on_retry(&RetryEvent::failed(number, &self.broker_url, err));
                tokio::select! {
                    _ = sleep(self.config.retry_pause) => Some(Transition::DialFailed),
                    _ = cancelled(&mut self.shutdown) => None,
                }
            }
        }
    }
}

/// Resolves once shutdown is requested or its sender is dropped.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
