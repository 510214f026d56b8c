// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod error;
mod infrastructure;
mod presentation;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::application::backends::Backends;
use crate::application::telemetry_server::TelemetryServer;
use crate::domain::dictionary::Dictionary;
use crate::infrastructure::config::{load_dictionaries, load_env_settings};
use crate::infrastructure::influx_repository::InfluxConnector;
use crate::infrastructure::listeners::{AxumHttpTransport, WebSocketTransport};
use crate::infrastructure::mqtt_broker::MqttConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let settings = load_env_settings()?;
    let dictionaries = load_dictionaries(&settings.dictionaries_config)?;
    report_dictionaries(&dictionaries);
    let config = settings.server_config(dictionaries);

    // Production backends (infrastructure layer)
    let backends = Backends {
        broker: Arc::new(MqttConnector::default()),
        clients: Arc::new(WebSocketTransport),
        http: Arc::new(AxumHttpTransport),
        history: Arc::new(InfluxConnector),
    };

    let mut server = TelemetryServer::new(config, backends)?;
    let ready = match server.start().await {
        Ok(ready) => ready,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    println!("Server listening in {}", ready.http_addr.port());

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    tracing::info!(state = ?server.state(), "Shutdown complete");

    Ok(())
}

fn report_dictionaries(dictionaries: &[Arc<Dictionary>]) {
    for dictionary in dictionaries {
        if dictionary.is_empty() {
            tracing::warn!(dictionary = dictionary.key(), "Dictionary declares no measurements");
            continue;
        }
        let names: Vec<&str> = dictionary.list_measurements().collect();
        tracing::info!(
            dictionary = dictionary.key(),
            name = dictionary.display_name(),
            count = dictionary.len(),
            measurements = ?names,
            "Loaded dictionary"
        );
        for measurement in dictionary.measurements() {
            let schema = measurement.primary();
            tracing::debug!(
                dictionary = dictionary.key(),
                measurement = %measurement.name,
                channel = %measurement.channel_key,
                units = schema.units(),
                format = ?schema.format(),
                "Registered channel"
            );
        }
        for warning in dictionary.warnings() {
            tracing::warn!(
                dictionary = dictionary.key(),
                measurement = %warning.measurement,
                variant = warning.variant,
                "{}",
                warning.warning
            );
        }
    }
}
