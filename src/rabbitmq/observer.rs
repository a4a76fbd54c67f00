// src/rabbitmq/observer.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::events::{BlockedEvent, CloseEvent, ConnectionEvent, RetryEvent};

/// Receives supervisor notifications.
///
/// Every method runs synchronously inside the supervisor task, so a slow
/// implementation delays recovery. Hand heavy work off to another task.
pub trait ConnectionObserver: Send + Sync {
    fn on_blocked(&self, _event: &BlockedEvent) {}

    fn on_close(&self, _event: &CloseEvent) {}

    fn on_retry(&self, _event: &RetryEvent) {}

    /// Automatic recovery has stopped for good.
    fn on_terminal(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

type Callback<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Adapts plain closures to [`ConnectionObserver`]. Unset slots do nothing.
#[derive(Default)]
pub struct CallbackObserver {
    blocked: Option<Callback<BlockedEvent>>,
    close: Option<Callback<CloseEvent>>,
    retry: Option<Callback<RetryEvent>>,
    terminal: Option<Box<dyn Fn() + Send + Sync>>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_blocked(mut self, f: impl Fn(&BlockedEvent) + Send + Sync + 'static) -> Self {
        self.blocked = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseEvent) + Send + Sync + 'static) -> Self {
        self.close = Some(Box::new(f));
        self
    }

    pub fn on_retry(mut self, f: impl Fn(&RetryEvent) + Send + Sync + 'static) -> Self {
        self.retry = Some(Box::new(f));
        self
    }

    pub fn on_terminal(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.terminal = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("blocked", &self.blocked.is_some())
            .field("close", &self.close.is_some())
            .field("retry", &self.retry.is_some())
            .field("terminal", &self.terminal.is_some())
            .finish()
    }
}

impl ConnectionObserver for CallbackObserver {
    fn on_blocked(&self, event: &BlockedEvent) {
        if let Some(f) = &self.blocked {
            f(event);
        }
    }

    fn on_close(&self, event: &CloseEvent) {
        if let Some(f) = &self.close {
            f(event);
        }
    }

    fn on_retry(&self, event: &RetryEvent) {
        if let Some(f) = &self.retry {
            f(event);
        }
    }

    fn on_terminal(&self) {
        if let Some(f) = &self.terminal {
            f();
        }
    }
}

/// Fans every notification out to several observers, in insertion order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn ConnectionObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl ConnectionObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn push(&mut self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ConnectionObserver for ObserverSet {
    fn on_blocked(&self, event: &BlockedEvent) {
        for observer in &self.observers {
            observer.on_blocked(event);
        }
    }

    fn on_close(&self, event: &CloseEvent) {
        for observer in &self.observers {
            observer.on_close(event);
        }
    }

    fn on_retry(&self, event: &RetryEvent) {
        for observer in &self.observers {
            observer.on_retry(event);
        }
    }

    fn on_terminal(&self) {
        for observer in &self.observers {
            observer.on_terminal();
        }
    }
}

/// Forwards notifications as [`ConnectionEvent`]s over an unbounded channel.
///
/// Sending never blocks the supervisor; events are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct EventChannelObserver {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event);
    }
}

impl ConnectionObserver for EventChannelObserver {
    fn on_blocked(&self, event: &BlockedEvent) {
        self.forward(ConnectionEvent::Blocked(event.clone()));
    }

    fn on_close(&self, event: &CloseEvent) {
        self.forward(ConnectionEvent::Closed(event.clone()));
    }

    fn on_retry(&self, event: &RetryEvent) {
        self.forward(ConnectionEvent::Retry(event.clone()));
    }

    fn on_terminal(&self) {
        self.forward(ConnectionEvent::Terminal);
    }
}

/// Writes every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ConnectionObserver for TracingObserver {
    fn on_blocked(&self, event: &BlockedEvent) {
        warn!(
            url = %event.broker_url,
            connection_id = %event.connection_id,
            reason = %event.reason,
            "RabbitMQ connection blocked"
        );
    }

    fn on_close(&self, event: &CloseEvent) {
        warn!(
            url = %event.broker_url,
            connection_id = %event.connection_id,
            code = event.code,
            server = event.server,
            recoverable = event.recoverable,
            "RabbitMQ connection closed: {}",
            event.reason
        );
    }

    fn on_retry(&self, event: &RetryEvent) {
        match &event.error {
            Some(err) => warn!(
                url = %event.broker_url,
                attempt = event.attempt,
                "Reconnect attempt failed: {}",
                err
            ),
            None => info!(
                url = %event.broker_url,
                attempt = event.attempt,
                "Reconnected to RabbitMQ"
            ),
        }
    }

    fn on_terminal(&self) {
        error!("Max reconnection attempts reached. Giving up.");
    }
}
