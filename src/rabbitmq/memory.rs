// src/rabbitmq/memory.rs
//! In-process broker for exercising the supervisor and declarer without a network.
//!
//! A [`MemoryBroker`] scripts dial and declaration outcomes, counts every
//! call, and hands out [`MemoryConnectionHandle`]s that inject blocked and
//! closed signals into the connections it created.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::errors::{ChannelError, ConnectionError, ExchangeDeclareError};
use super::options::ExchangeDeclaration;
use super::transport::{BrokerChannel, BrokerConnection, CloseDetail, ConnectionSignal, Connector, DialOptions};

#[derive(Debug, Default)]
struct BrokerState {
    dial_script: VecDeque<Result<(), String>>,
    dial_default: Option<String>,
    dial_delay: Duration,
    dial_instants: Vec<Instant>,
    last_dial: Option<DialOptions>,
    connections: Vec<MemoryConnectionHandle>,
    declare_script: VecDeque<Result<(), String>>,
    declare_default: Option<String>,
    declared: Vec<String>,
    channels_opened: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` dials fail with `reason`, then the default applies again.
    pub fn fail_next_dials(&self, count: usize, reason: &str) {
        let mut state = self.lock();
        for _ in 0..count {
            state.dial_script.push_back(Err(reason.to_string()));
        }
    }

    pub fn fail_all_dials(&self, reason: &str) {
        self.lock().dial_default = Some(reason.to_string());
    }

    pub fn accept_dials(&self) {
        let mut state = self.lock();
        state.dial_script.clear();
        state.dial_default = None;
    }

    /// Every dial takes this long before it resolves.
    pub fn set_dial_delay(&self, delay: Duration) {
        self.lock().dial_delay = delay;
    }

    pub fn dial_attempts(&self) -> usize {
        self.lock().dial_instants.len()
    }

    pub fn dial_instants(&self) -> Vec<Instant> {
        self.lock().dial_instants.clone()
    }

    pub fn last_dial_options(&self) -> Option<DialOptions> {
        self.lock().last_dial.clone()
    }

    pub fn connections(&self) -> Vec<MemoryConnectionHandle> {
        self.lock().connections.clone()
    }

    pub fn latest_connection(&self) -> Option<MemoryConnectionHandle> {
        self.lock().connections.last().cloned()
    }

    pub fn fail_next_declarations(&self, count: usize, reason: &str) {
        let mut state = self.lock();
        for _ in 0..count {
            state.declare_script.push_back(Err(reason.to_string()));
        }
    }

    pub fn fail_all_declarations(&self, reason: &str) {
        self.lock().declare_default = Some(reason.to_string());
    }

    pub fn declare_attempts(&self) -> usize {
        self.lock().declared.len()
    }

    /// Names passed to every declaration attempt, in order.
    pub fn declared_exchanges(&self) -> Vec<String> {
        self.lock().declared.clone()
    }

    pub fn channels_opened(&self) -> usize {
        self.lock().channels_opened
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, options: &DialOptions) -> Result<MemoryConnection, ConnectionError> {
        let delay = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.dial_instants.push(Instant::now());
            state.last_dial = Some(options.clone());
            state.dial_delay
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = match state.dial_script.pop_front() {
            Some(outcome) => outcome,
            None => match &state.dial_default {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            },
        };
        outcome.map_err(ConnectionError::Dial)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let handle = MemoryConnectionHandle {
            id: Uuid::new_v4(),
            open: Arc::clone(&open),
            signals: tx,
        };
        state.connections.push(handle.clone());

        Ok(MemoryConnection {
            id: handle.id,
            open,
            signals: tokio::sync::Mutex::new(rx),
            broker: Arc::clone(&self.state),
        })
    }
}

/// Test-side handle for poking a connection created by the broker.
#[derive(Debug, Clone)]
pub struct MemoryConnectionHandle {
    id: Uuid,
    open: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
}

impl MemoryConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn block(&self, reason: &str) {
        let _ = self.signals.send(ConnectionSignal::Blocked {
            active: true,
            reason: reason.to_string(),
        });
    }

    pub fn unblock(&self) {
        let _ = self.signals.send(ConnectionSignal::Blocked {
            active: false,
            reason: String::new(),
        });
    }

    /// Simulates the broker closing the connection with a reply code.
    pub fn close_by_server(&self, code: u16, reason: &str, recoverable: bool) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.signals.send(ConnectionSignal::Closed(Some(CloseDetail {
            code,
            server: true,
            reason: reason.to_string(),
            recoverable,
        })));
    }

    /// A close that carries no error details.
    pub fn close_quietly(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.signals.send(ConnectionSignal::Closed(None));
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    id: Uuid,
    open: Arc<AtomicBool>,
    signals: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnectionSignal>>,
    broker: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn next_signal(&self) -> ConnectionSignal {
        let mut signals = self.signals.lock().await;
        match signals.recv().await {
            Some(signal) => signal,
            None => ConnectionSignal::Closed(None),
        }
    }

    async fn open_channel(&self) -> Result<MemoryChannel, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ConnectionClosed);
        }
        let mut state = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        state.channels_opened += 1;
        Ok(MemoryChannel {
            broker: Arc::clone(&self.broker),
        })
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

pub struct MemoryChannel {
    broker: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), ExchangeDeclareError> {
        let mut state = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        state.declared.push(exchange.name.clone());
        let outcome = match state.declare_script.pop_front() {
            Some(outcome) => outcome,
            None => match &state.declare_default {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            },
        };
        outcome.map_err(|reason| ExchangeDeclareError::Rejected {
            exchange: exchange.name.clone(),
            reason,
        })
    }
}
