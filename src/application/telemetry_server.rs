// Telemetry server - backend acquisition, routing and shutdown
use crate::application::backends::{
    Backends, BrokerConnection, BrokerMessage, ClientListener, HttpListener,
};
use crate::application::catalog::TelemetryCatalog;
use crate::application::router::{
    ChannelRouter, RouterCounters, RouterStats, spawn_history_writer,
};
use crate::application::server_config::ServerConfig;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::error::{Backend, ConfigError, StartError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Starting,
    Running,
    Stopped,
    Failed,
}

/// Returned by a successful `start`.
#[derive(Debug, Clone)]
pub struct ReadyHandle {
    pub http_addr: SocketAddr,
    pub wss_addr: SocketAddr,
    pub channels: usize,
}

/// Handles acquired during `start`, released in reverse on `stop`.
#[derive(Default)]
struct LiveBackends {
    broker: Option<Arc<dyn BrokerConnection>>,
    clients: Option<Arc<dyn ClientListener>>,
    http: Option<Arc<dyn HttpListener>>,
    history: Option<Arc<dyn TelemetryRepository>>,
    router: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
    history_writer: Option<JoinHandle<()>>,
}

pub struct TelemetryServer {
    config: ServerConfig,
    backends: Backends,
    state: ServerState,
    live: LiveBackends,
    counters: Arc<RouterCounters>,
}

impl TelemetryServer {
    pub fn new(config: ServerConfig, backends: Backends) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            backends,
            state: ServerState::Unstarted,
            live: LiveBackends::default(),
            counters: Arc::new(RouterCounters::default()),
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    /// Acquire broker, WebSocket listener, HTTP listener and history store in that
    /// order. The first failure releases whatever was acquired and is returned.
    pub async fn start(&mut self) -> Result<ReadyHandle, StartError> {
        if self.state != ServerState::Unstarted {
            return Err(StartError::InvalidState(self.state));
        }
        self.state = ServerState::Starting;

        match self.acquire().await {
            Ok(ready) => {
                self.state = ServerState::Running;
                tracing::info!(
                    http = %ready.http_addr,
                    websocket = %ready.wss_addr,
                    channels = ready.channels,
                    "Telemetry server running"
                );
                Ok(ready)
            }
            Err(e) => {
                tracing::error!(error = %e, "Telemetry server failed to start");
                self.release().await;
                self.state = ServerState::Failed;
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<ReadyHandle, StartError> {
        let limit = self.config.connect_timeout;
        let dictionaries = self.config.dictionaries.clone();

        let broker_url = self.config.broker_url.clone();
        let session = bounded(limit, self.backends.broker.connect(&broker_url))
            .await
            .map_err(|reason| StartError::connect(Backend::Broker, &broker_url, reason))?;
        self.live.broker = Some(session.connection.clone());
        let inbound: mpsc::Receiver<BrokerMessage> = session.inbound;

        let channel_keys: Vec<String> = dictionaries
            .iter()
            .flat_map(|d| d.measurements().iter().map(|m| m.channel_key.clone()))
            .collect();
        for channel_key in &channel_keys {
            bounded(limit, session.connection.subscribe(channel_key))
                .await
                .map_err(|reason| {
                    StartError::connect(
                        Backend::Broker,
                        &broker_url,
                        format!("subscribe to '{}' failed: {}", channel_key, reason),
                    )
                })?;
        }
        tracing::info!(url = %broker_url, channels = channel_keys.len(), "Connected to broker");

        let host = self.config.host.clone();
        let wss_addr = format!("{}:{}", host, self.config.wss_port);
        let clients = bounded(limit, self.backends.clients.bind(&host, self.config.wss_port))
            .await
            .map_err(|reason| StartError::bind(Backend::WebSocket, &wss_addr, reason))?;
        self.live.clients = Some(clients.clone());

        let catalog = TelemetryCatalog::new(dictionaries.clone());
        let http_addr = format!("{}:{}", host, self.config.port);
        let http = bounded(
            limit,
            self.backends.http.bind(&host, self.config.port, catalog.clone()),
        )
        .await
        .map_err(|reason| StartError::bind(Backend::Http, &http_addr, reason))?;
        self.live.http = Some(http.clone());

        let history_target = self.config.history.clone();
        let history_url = history_target
            .url()
            .map_err(|e| StartError::connect(Backend::History, &history_target.host, e))?;
        let history = bounded(
            limit,
            self.backends
                .history
                .connect(history_url.as_str(), &history_target.db),
        )
        .await
        .map_err(|reason| {
            StartError::connect(
                Backend::History,
                format!("{} ({})", history_url, history_target.db),
                reason,
            )
        })?;
        self.live.history = Some(history.clone());
        catalog.attach_history(history.clone());

        let (history_tx, writer) = spawn_history_writer(history, self.counters.clone());
        self.live.history_writer = Some(writer);
        let router = ChannelRouter::new(&dictionaries, clients.clone(), history_tx, self.counters.clone());
        self.live.router = Some(router.spawn(inbound));

        Ok(ReadyHandle {
            http_addr: http.local_addr(),
            wss_addr: clients.local_addr(),
            channels: channel_keys.len(),
        })
    }

    /// Release everything in reverse acquisition order. A no-op unless running.
    pub async fn stop(&mut self) {
        match self.state {
            ServerState::Running => {
                tracing::info!("Stopping telemetry server");
                self.release().await;
                self.state = ServerState::Stopped;
                tracing::info!(stats = ?self.stats(), "Telemetry server stopped");
            }
            state => tracing::debug!(?state, "Stop requested, nothing to release"),
        }
    }

    async fn release(&mut self) {
        let limit = self.config.shutdown_timeout;

        if let Some((shutdown, handle)) = self.live.router.take() {
            let _ = shutdown.send(());
            join_bounded("channel router", limit, handle).await;
        }
        // The router owned the only sender, so the writer drains and exits.
        if let Some(writer) = self.live.history_writer.take() {
            join_bounded("history writer", limit, writer).await;
        }
        if let Some(history) = self.live.history.take() {
            release_bounded(Backend::History, limit, history.close()).await;
        }
        if let Some(http) = self.live.http.take() {
            release_bounded(Backend::Http, limit, http.close()).await;
        }
        if let Some(clients) = self.live.clients.take() {
            release_bounded(Backend::WebSocket, limit, clients.close()).await;
        }
        if let Some(broker) = self.live.broker.take() {
            release_bounded(Backend::Broker, limit, broker.close()).await;
        }
    }
}

impl Drop for TelemetryServer {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.live.router.take() {
            handle.abort();
        }
        if let Some(writer) = self.live.history_writer.take() {
            writer.abort();
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    attempt: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

async fn release_bounded(
    backend: Backend,
    limit: Duration,
    release: impl Future<Output = anyhow::Result<()>>,
) {
    match tokio::time::timeout(limit, release).await {
        Ok(Ok(())) => tracing::debug!(%backend, "Released"),
        Ok(Err(e)) => tracing::warn!(%backend, error = %e, "Release failed"),
        Err(_) => tracing::warn!(%backend, ?limit, "Release timed out, continuing shutdown"),
    }
}

async fn join_bounded(task: &str, limit: Duration, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(task, error = %e, "Task ended abnormally"),
        Err(_) => {
            tracing::warn!(task, ?limit, "Task did not finish in time, aborting");
            abort.abort();
        }
    }
}
