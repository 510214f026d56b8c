// In-memory backends for exercising the router and server lifecycle
use crate::application::backends::{
    Backends, BrokerConnection, BrokerConnector, BrokerMessage, BrokerSession, ClientId,
    ClientListener, ClientSendError, ClientTransport, HttpListener, HttpTransport,
};
use crate::application::catalog::TelemetryCatalog;
use crate::application::router::HistoryRecord;
use crate::application::telemetry_repository::{HistoryConnector, TelemetryRepository, TimeRange};
use crate::domain::dictionary::Dictionary;
use crate::domain::measurement::MeasurementSchema;
use crate::domain::telemetry::TimeSeriesPoint;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn void_av_dictionary() -> Dictionary {
    let mut dictionary = Dictionary::new("Void AV Bay", "void_av");
    dictionary
        .add_measurement(
            "altitude",
            "av_altitude",
            vec![MeasurementSchema::float("meters", 0.0, 35000.0).unwrap()],
        )
        .unwrap();
    dictionary
        .add_measurement(
            "latitude",
            "av_latitude",
            vec![MeasurementSchema::float("degrees", 90.0, 90.0).unwrap()],
        )
        .unwrap();
    dictionary
        .add_measurement(
            "longitude",
            "av_longitude",
            vec![MeasurementSchema::float("degrees", -180.0, 180.0).unwrap()],
        )
        .unwrap();
    dictionary
}

/// How a fake backend behaves when acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acquire {
    #[default]
    Succeed,
    Fail,
    Hang,
}

impl Acquire {
    async fn apply(self, what: &str) -> anyhow::Result<()> {
        match self {
            Acquire::Succeed => Ok(()),
            Acquire::Fail => anyhow::bail!("{} unreachable", what),
            Acquire::Hang => futures::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct LoopbackBroker {
    pub behavior: Acquire,
    pub connection: Mutex<Option<Arc<LoopbackConnection>>>,
}

impl LoopbackBroker {
    pub fn connection(&self) -> Arc<LoopbackConnection> {
        self.connection
            .lock()
            .unwrap()
            .clone()
            .expect("broker was never connected")
    }
}

#[async_trait]
impl BrokerConnector for LoopbackBroker {
    async fn connect(&self, url: &str) -> anyhow::Result<BrokerSession> {
        self.behavior.apply(url).await?;
        let (tx, inbound) = mpsc::channel(64);
        let connection = Arc::new(LoopbackConnection {
            tx,
            subscriptions: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        *self.connection.lock().unwrap() = Some(connection.clone());
        Ok(BrokerSession {
            connection,
            inbound,
        })
    }
}

/// Delivers published payloads back to itself for subscribed channels.
pub struct LoopbackConnection {
    tx: mpsc::Sender<BrokerMessage>,
    pub subscriptions: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
}

#[async_trait]
impl BrokerConnection for LoopbackConnection {
    async fn subscribe(&self, channel_key: &str) -> anyhow::Result<()> {
        self.subscriptions.lock().unwrap().push(channel_key.to_string());
        Ok(())
    }

    async fn publish(&self, channel_key: &str, payload: Bytes) -> anyhow::Result<()> {
        self.tx
            .send(BrokerMessage {
                topic: channel_key.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingClients {
    clients: Mutex<Vec<ClientId>>,
    sent: Mutex<Vec<(ClientId, String)>>,
    pub closes: AtomicUsize,
}

impl RecordingClients {
    pub fn with_clients(ids: &[ClientId]) -> Self {
        Self {
            clients: Mutex::new(ids.to_vec()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(ClientId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientListener for RecordingClients {
    fn local_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8082))
    }

    fn clients(&self) -> Vec<ClientId> {
        self.clients.lock().unwrap().clone()
    }

    fn send(&self, client: ClientId, payload: &str) -> Result<(), ClientSendError> {
        if !self.clients.lock().unwrap().contains(&client) {
            return Err(ClientSendError::Disconnected(client));
        }
        self.sent.lock().unwrap().push((client, payload.to_string()));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeClientTransport {
    pub behavior: Acquire,
    pub listener: Arc<RecordingClients>,
}

#[async_trait]
impl ClientTransport for FakeClientTransport {
    async fn bind(&self, host: &str, port: u16) -> anyhow::Result<Arc<dyn ClientListener>> {
        self.behavior.apply(&format!("{}:{}", host, port)).await?;
        Ok(self.listener.clone())
    }
}

#[derive(Default)]
pub struct FakeHttpListener {
    pub closes: AtomicUsize,
    pub catalog: Mutex<Option<TelemetryCatalog>>,
    /// When set, `close` never completes.
    pub hang_on_close: AtomicBool,
}

#[async_trait]
impl HttpListener for FakeHttpListener {
    fn local_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8080))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_close.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub struct FakeHttpTransport {
    pub behavior: Acquire,
    pub listener: Arc<FakeHttpListener>,
}

#[async_trait]
impl HttpTransport for FakeHttpTransport {
    async fn bind(
        &self,
        host: &str,
        port: u16,
        catalog: TelemetryCatalog,
    ) -> anyhow::Result<Arc<dyn HttpListener>> {
        self.behavior.apply(&format!("{}:{}", host, port)).await?;
        *self.listener.catalog.lock().unwrap() = Some(catalog);
        Ok(self.listener.clone())
    }
}

#[derive(Default)]
pub struct RecordingHistory {
    records: Mutex<Vec<HistoryRecord>>,
    pub closes: AtomicUsize,
}

impl RecordingHistory {
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryRepository for RecordingHistory {
    async fn write(
        &self,
        dictionary_key: &str,
        measurement: &str,
        timestamp_ms: i64,
        value: f64,
    ) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(HistoryRecord {
            dictionary_key: dictionary_key.to_string(),
            measurement: measurement.to_string(),
            timestamp_ms,
            value,
        });
        Ok(())
    }

    async fn query(
        &self,
        dictionary_key: &str,
        measurement: &str,
        range: TimeRange,
    ) -> anyhow::Result<Vec<TimeSeriesPoint>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.dictionary_key == dictionary_key && r.measurement == measurement)
            .filter(|r| r.timestamp_ms >= range.start_ms && r.timestamp_ms <= range.end_ms)
            .map(|r| TimeSeriesPoint::new(r.timestamp_ms, r.value))
            .collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeHistoryConnector {
    pub behavior: Acquire,
    pub repository: Arc<RecordingHistory>,
}

#[async_trait]
impl HistoryConnector for FakeHistoryConnector {
    async fn connect(&self, host: &str, db: &str) -> anyhow::Result<Arc<dyn TelemetryRepository>> {
        self.behavior.apply(&format!("{}/{}", host, db)).await?;
        Ok(self.repository.clone())
    }
}

/// All four fakes, kept around so tests can inspect them after the server runs.
pub struct FakeBackends {
    pub broker: Arc<LoopbackBroker>,
    pub clients: Arc<FakeClientTransport>,
    pub http: Arc<FakeHttpTransport>,
    pub history: Arc<FakeHistoryConnector>,
}

impl FakeBackends {
    pub fn new() -> Self {
        Self::with_behavior(Acquire::Succeed, Acquire::Succeed, Acquire::Succeed, Acquire::Succeed)
    }

    pub fn with_behavior(broker: Acquire, clients: Acquire, http: Acquire, history: Acquire) -> Self {
        Self {
            broker: Arc::new(LoopbackBroker {
                behavior: broker,
                connection: Mutex::new(None),
            }),
            clients: Arc::new(FakeClientTransport {
                behavior: clients,
                listener: Arc::new(RecordingClients::with_clients(&[1, 2])),
            }),
            http: Arc::new(FakeHttpTransport {
                behavior: http,
                listener: Arc::new(FakeHttpListener::default()),
            }),
            history: Arc::new(FakeHistoryConnector {
                behavior: history,
                repository: Arc::new(RecordingHistory::default()),
            }),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            broker: self.broker.clone(),
            clients: self.clients.clone(),
            http: self.http.clone(),
            history: self.history.clone(),
        }
    }
}
