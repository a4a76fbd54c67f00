// src/rabbitmq/lapin_transport.rs
// Transport implementation backed by lapin.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::ExchangeDeclareOptions;
use lapin::protocol::AMQPErrorKind;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, Error as LapinError};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{ChannelError, ConnectionError, ExchangeDeclareError};
use super::options::{ExchangeDeclaration, ExchangeKind};
use super::transport::{BrokerChannel, BrokerConnection, CloseDetail, ConnectionSignal, Connector, DialOptions};

// lapin records connection.blocked in the connection status without a callback, so it is polled.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Reply code sent when the supervisor force-closes a connection.
const REPLY_SUCCESS: u16 = 200;

#[derive(Clone, Default)]
pub struct LapinConnector {
    properties: ConnectionProperties,
}

impl LapinConnector {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Connector for LapinConnector {
    type Connection = LapinConnection;

    async fn connect(&self, options: &DialOptions) -> Result<LapinConnection, ConnectionError> {
        let mut uri: AMQPUri = options.url.parse().map_err(ConnectionError::InvalidUri)?;
        let heartbeat = u16::try_from(options.heartbeat.as_secs()).unwrap_or(u16::MAX);
        uri.query.heartbeat = Some(heartbeat);

        let connection = Connection::connect_uri(uri, self.properties.clone()).await?;
        Ok(LapinConnection::new(connection))
    }
}

pub struct LapinConnection {
    id: Uuid,
    inner: Connection,
    errors: Mutex<mpsc::UnboundedReceiver<LapinError>>,
    blocked: AtomicBool,
}

impl LapinConnection {
    fn new(inner: Connection) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        inner.on_error(move |err| {
            let _ = tx.send(err);
        });

        Self {
            id: Uuid::new_v4(),
            blocked: AtomicBool::new(inner.status().blocked()),
            inner,
            errors: Mutex::new(rx),
        }
    }

    pub fn inner(&self) -> &Connection {
        &self.inner
    }
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn next_signal(&self) -> ConnectionSignal {
        let mut errors = self.errors.lock().await;
        let mut ticker = interval(STATUS_POLL_INTERVAL);
        loop {
            tokio::select! {
                biased;

                err = errors.recv() => {
                    return ConnectionSignal::Closed(err.map(|err| close_detail(&err)));
                }
                _ = ticker.tick() => {
                    let status = self.inner.status();
                    if status.closed() || status.errored() {
                        return pending_close(&mut errors);
                    }
                    let blocked = status.blocked();
                    if self.blocked.swap(blocked, Ordering::SeqCst) != blocked {
                        return ConnectionSignal::Blocked {
                            active: blocked,
                            reason: if blocked {
                                "connection blocked by broker".to_string()
                            } else {
                                String::new()
                            },
                        };
                    }
                }
            }
        }
    }

    async fn open_channel(&self) -> Result<LapinChannel, ChannelError> {
        let channel = self.inner.create_channel().await?;
        Ok(LapinChannel { inner: channel })
    }

    async fn close(&self) {
        if !self.inner.status().connected() {
            return;
        }
        if let Err(e) = self.inner.close(REPLY_SUCCESS, "Closing connection").await {
            warn!(connection_id = %self.id, "Failed to close connection: {}", e);
        } else {
            debug!(connection_id = %self.id, "Connection closed");
        }
    }
}

pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), ExchangeDeclareError> {
        let options = ExchangeDeclareOptions {
            passive: false,
            durable: exchange.durable,
            auto_delete: exchange.auto_delete,
            internal: exchange.internal,
            nowait: exchange.no_wait,
        };
        self.inner
            .exchange_declare(
                &exchange.name,
                exchange.kind.into(),
                options,
                field_table(&exchange.arguments),
            )
            .await
            .map_err(|e| ExchangeDeclareError::Rejected {
                exchange: exchange.name.clone(),
                reason: e.to_string(),
            })
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Close signal for a connection whose status already reads closed. Details
/// come from an error lapin queued before the status changed, if any.
fn pending_close(errors: &mut mpsc::UnboundedReceiver<LapinError>) -> ConnectionSignal {
    ConnectionSignal::Closed(errors.try_recv().ok().map(|err| close_detail(&err)))
}

// lapin does not record which side initiated the close; protocol errors are treated as broker closes.
fn close_detail(err: &LapinError) -> CloseDetail {
    match err {
        LapinError::ProtocolError(amqp) => CloseDetail {
            code: amqp.get_id(),
            server: true,
            reason: amqp.get_message().as_str().to_string(),
            recoverable: matches!(amqp.kind(), AMQPErrorKind::Soft(_)),
        },
        other => CloseDetail {
            code: 0,
            server: false,
            reason: other.to_string(),
            recoverable: true,
        },
    }
}

/// Maps JSON exchange arguments onto AMQP field values.
fn field_table(arguments: &BTreeMap<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(ShortString::from(key.clone()), amqp_value(value));
    }
    table
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => AMQPValue::LongLongInt(i),
            (None, Some(f)) => AMQPValue::Double(f),
            (None, None) => AMQPValue::LongString(LongString::from(n.to_string())),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        other => AMQPValue::LongString(LongString::from(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::AMQPError;
    use serde_json::json;

    #[test]
    fn test_amqp_values() {
        assert_eq!(amqp_value(&json!(true)), AMQPValue::Boolean(true));
        assert_eq!(amqp_value(&json!(60000)), AMQPValue::LongLongInt(60000));
        assert_eq!(amqp_value(&json!(0.5)), AMQPValue::Double(0.5));
        assert_eq!(
            amqp_value(&json!("orders.dlx")),
            AMQPValue::LongString(LongString::from("orders.dlx".to_string()))
        );
    }

    #[test]
    fn test_field_table_keeps_every_argument() {
        let mut arguments = BTreeMap::new();
        arguments.insert("alternate-exchange".to_string(), json!("orders.unrouted"));
        arguments.insert("x-max-length".to_string(), json!(1000));

        let table = field_table(&arguments);

        assert_eq!(table.inner().len(), 2);
    }

    #[test]
    fn test_exchange_kind_mapping() {
        assert_eq!(lapin::ExchangeKind::from(ExchangeKind::Topic), lapin::ExchangeKind::Topic);
        assert_eq!(lapin::ExchangeKind::from(ExchangeKind::Headers), lapin::ExchangeKind::Headers);
    }

    fn protocol_error(id: u16, message: &str) -> LapinError {
        let amqp = AMQPError::from_id(id, ShortString::from(message.to_string())).unwrap();
        LapinError::ProtocolError(amqp)
    }

    #[test]
    fn test_hard_protocol_error_close_detail() {
        let detail = close_detail(&protocol_error(320, "CONNECTION_FORCED - broker forced connection closure"));

        assert_eq!(detail.code, 320);
        assert_eq!(detail.reason, "CONNECTION_FORCED - broker forced connection closure");
        assert!(detail.server);
        assert!(!detail.recoverable);
    }

    #[test]
    fn test_soft_protocol_error_close_detail() {
        let detail = close_detail(&protocol_error(404, "NOT_FOUND - no exchange 'orders'"));

        assert_eq!(detail.code, 404);
        assert!(detail.server);
        assert!(detail.recoverable);
    }

    #[test]
    fn test_pending_close_keeps_queued_details() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(protocol_error(320, "CONNECTION_FORCED")).unwrap();

        match pending_close(&mut rx) {
            ConnectionSignal::Closed(Some(detail)) => assert_eq!(detail.code, 320),
            other => panic!("expected close details, got {:?}", other),
        }
        assert_eq!(pending_close(&mut rx), ConnectionSignal::Closed(None));
    }

    #[test]
    fn test_io_error_close_detail() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let detail = close_detail(&LapinError::IOError(std::sync::Arc::new(io)));

        assert_eq!(detail.code, 0);
        assert!(!detail.server);
        assert!(detail.recoverable);
    }
}
