// MQTT broker adapter - rumqttc client driving the broker event loop
use crate::application::backends::{BrokerConnection, BrokerConnector, BrokerMessage, BrokerSession};
use crate::application::server_config::{BROKER_SCHEMES, DEFAULT_BROKER_PORT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const REQUEST_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 1024;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MqttConnector {
    client_id: String,
}

impl MqttConnector {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new(format!("rocket-telemetry-{}", std::process::id()))
    }
}

/// Host and port of an `mqtt://` or `tcp://` broker URL.
pub fn broker_address(url: &str) -> Result<(String, u16)> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid broker URL '{}'", url))?;
    if !BROKER_SCHEMES.contains(&parsed.scheme()) {
        anyhow::bail!("Unsupported broker scheme '{}'", parsed.scheme());
    }
    let host = parsed
        .host_str()
        .with_context(|| format!("Broker URL '{}' has no host", url))?;
    Ok((host.to_string(), parsed.port().unwrap_or(DEFAULT_BROKER_PORT)))
}

#[async_trait]
impl BrokerConnector for MqttConnector {
    async fn connect(&self, url: &str) -> Result<BrokerSession> {
        let (host, port) = broker_address(url)?;
        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        // Drive the event loop until the broker acknowledges the session.
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        anyhow::bail!("Broker refused connection: {:?}", ack.code);
                    }
                    break;
                }
                Ok(_) => continue,
                Err(e) => anyhow::bail!("MQTT connection failed: {}", e),
            }
        }

        let topics = Arc::new(Mutex::new(Vec::new()));
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let pump = tokio::spawn(pump(eventloop, client.clone(), topics.clone(), tx));

        Ok(BrokerSession {
            connection: Arc::new(MqttConnection {
                client,
                topics,
                pump: Mutex::new(Some(pump)),
            }),
            inbound,
        })
    }
}

/// Forward publishes to the router; re-subscribe after the client reconnects.
/// Exits once a requested DISCONNECT has been written to the broker.
async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    tx: mpsc::Sender<BrokerMessage>,
) {
    let mut reconnecting = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BrokerMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if tx.send(message).await.is_err() {
                    tracing::debug!("Router gone, stopping MQTT pump");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) if reconnecting => {
                reconnecting = false;
                let topics = topics.lock().map(|t| t.clone()).unwrap_or_default();
                tracing::info!(topics = topics.len(), "Reconnected to broker, restoring subscriptions");
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(%topic, error = %e, "Failed to restore subscription");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("DISCONNECT sent, stopping MQTT pump");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                reconnecting = true;
                tracing::warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

pub struct MqttConnection {
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn subscribe(&self, channel_key: &str) -> Result<()> {
        self.client
            .subscribe(channel_key, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", channel_key))?;
        if let Ok(mut topics) = self.topics.lock() {
            topics.push(channel_key.to_string());
        }
        Ok(())
    }

    async fn publish(&self, channel_key: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(channel_key, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .with_context(|| format!("Failed to publish to '{}'", channel_key))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let result = self.client.disconnect().await;
        let pump = self.pump.lock().ok().and_then(|mut p| p.take());
        if let Some(pump) = pump {
            // The pump owns the event loop, so it has to run to flush DISCONNECT.
            let abort = pump.abort_handle();
            if tokio::time::timeout(DISCONNECT_TIMEOUT, pump).await.is_err() {
                tracing::warn!(timeout = ?DISCONNECT_TIMEOUT, "Broker did not take DISCONNECT in time");
                abort.abort();
            }
        }
        result.context("Failed to disconnect from broker")?;
        Ok(())
    }
}
