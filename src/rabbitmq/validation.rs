// src/rabbitmq/validation.rs
// Normalization applied once to every configuration record before use. Never touches the network.

use std::sync::Arc;

use super::errors::ConfigError;
use super::events::ExchangeDeclareLog;
use super::options::{
    ExchangeDeclaration, ExchangeKind, ExchangeSpec, RabbitConfig, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_EXCHANGE_RETRY_COUNT, DEFAULT_HEARTBEAT, DEFAULT_RETRY_PAUSE,
};

pub fn validate_connection_config(mut config: RabbitConfig) -> Result<RabbitConfig, ConfigError> {
    let url = config.url.trim();
    if url.is_empty() {
        return Err(ConfigError::EmptyUrl);
    }
    if !(url.starts_with("amqp://") || url.starts_with("amqps://")) {
        return Err(ConfigError::InvalidUrl(super::options::redact_url(url)));
    }
    config.url = url.to_string();

    if config.heartbeat.is_zero() {
        config.heartbeat = DEFAULT_HEARTBEAT;
    }
    if config.connect_timeout.is_zero() {
        config.connect_timeout = DEFAULT_CONNECT_TIMEOUT;
    }
    if config.retry_pause.is_zero() {
        config.retry_pause = DEFAULT_RETRY_PAUSE;
    }
    Ok(config)
}

pub fn validate_exchange_spec(spec: ExchangeSpec) -> Result<ExchangeDeclaration, ConfigError> {
    if spec.name.is_empty() {
        return Err(ConfigError::EmptyExchangeName);
    }
    let kind: ExchangeKind = spec.kind.parse()?;

    Ok(ExchangeDeclaration {
        name: spec.name,
        kind,
        durable: spec.durable,
        auto_delete: spec.auto_delete,
        internal: spec.internal,
        no_wait: spec.no_wait,
        arguments: spec.arguments,
        retry_count: if spec.retry_count == 0 {
            DEFAULT_EXCHANGE_RETRY_COUNT
        } else {
            spec.retry_count
        },
        retry_pause: if spec.retry_pause.is_zero() {
            DEFAULT_RETRY_PAUSE
        } else {
            spec.retry_pause
        },
        on_declare_attempt: spec.on_declare_attempt.unwrap_or_else(|| Arc::new(|_: &ExchangeDeclareLog| {})),
    })
}
