use std::path::PathBuf;

use anyhow::{Context, Result};
use resilient_rabbitmq::config::{self, AppConfig, CONFIG_FILE_NAME};
use resilient_rabbitmq::env::EnvConfig;
use resilient_rabbitmq::{
    ConnectionManager, ExchangeSpec, LapinConnector, RabbitConfig, SupervisorState, TracingObserver,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    if let Some("init-config") = args.next().as_deref() {
        let path = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        return config::create_default_config_file(&path);
    }

    let app_config = load_app_config()?;
    let rabbit_config = RabbitConfig::from_settings(&app_config.connection)
        .with_observer(TracingObserver);

    let manager = ConnectionManager::connect(LapinConnector::default(), rabbit_config)
        .await
        .context("Initial connection to RabbitMQ failed")?;

    for settings in &app_config.exchanges {
        let spec = ExchangeSpec::from_settings(settings).on_declare_attempt(|log| {
            warn!(exchange = %log.exchange.name, "Exchange declare attempt failed: {}", log.error);
        });
        if let Err(e) = manager.declare_exchange(spec).await {
            error!(exchange = %settings.name, "Failed to declare exchange: {}", e);
        }
    }

    info!("Service running. Press Ctrl+C to exit.");
    let mut state = manager.watch_state();
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = state.wait_for(|s| *s == SupervisorState::Terminated) => {
            error!("Automatic recovery stopped; shutting down");
        }
    }

    let exit = manager.shutdown().await?;
    info!(?exit, "Connection manager stopped");
    Ok(())
}

fn load_app_config() -> Result<AppConfig> {
    match config::load_config() {
        Ok(app_config) => Ok(app_config),
        Err(file_err) => {
            info!("No usable config file ({}), falling back to environment", file_err);
            let settings = EnvConfig::load()
                .context("AMQP_ADDR must be set when no config file is present")?
                .into_settings();
            Ok(AppConfig {
                connection: settings,
                exchanges: Vec::new(),
            })
        }
    }
}
