// Collaborator contracts for the broker and client-facing listeners
use crate::application::catalog::TelemetryCatalog;
use crate::application::telemetry_repository::HistoryConnector;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A message received from the broker on `topic`.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// A live broker connection plus the stream of messages for its subscriptions.
pub struct BrokerSession {
    pub connection: Arc<dyn BrokerConnection>,
    pub inbound: mpsc::Receiver<BrokerMessage>,
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, url: &str) -> anyhow::Result<BrokerSession>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn subscribe(&self, channel_key: &str) -> anyhow::Result<()>;

    // Part of the broker contract; the server itself only subscribes.
    #[allow(dead_code)]
    async fn publish(&self, channel_key: &str, payload: Bytes) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

pub type ClientId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientSendError {
    #[error("client {0} is no longer connected")]
    Disconnected(ClientId),

    #[error("outbound queue for client {0} is full")]
    QueueFull(ClientId),
}

#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn bind(&self, host: &str, port: u16) -> anyhow::Result<Arc<dyn ClientListener>>;
}

/// Push listener holding the connected WebSocket clients.
#[async_trait]
pub trait ClientListener: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    /// Currently connected clients, in connection order
    fn clients(&self) -> Vec<ClientId>;

    /// Queue `payload` for delivery; never waits on the network.
    fn send(&self, client: ClientId, payload: &str) -> Result<(), ClientSendError>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn bind(
        &self,
        host: &str,
        port: u16,
        catalog: TelemetryCatalog,
    ) -> anyhow::Result<Arc<dyn HttpListener>>;
}

#[async_trait]
pub trait HttpListener: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    async fn close(&self) -> anyhow::Result<()>;
}

/// The four backends a `TelemetryServer` acquires on start.
#[derive(Clone)]
pub struct Backends {
    pub broker: Arc<dyn BrokerConnector>,
    pub clients: Arc<dyn ClientTransport>,
    pub http: Arc<dyn HttpTransport>,
    pub history: Arc<dyn HistoryConnector>,
}
