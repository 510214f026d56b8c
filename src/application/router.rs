// Channel router - relays broker messages to clients and the history store
use crate::application::backends::{BrokerMessage, ClientListener};
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::dictionary::{Dictionary, Measurement};
use crate::domain::telemetry::TelemetryFrame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const HISTORY_QUEUE_CAPACITY: usize = 1024;

/// Point-in-time copy of the routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub relayed: u64,
    pub dropped_unknown: u64,
    pub dropped_malformed: u64,
    pub out_of_range: u64,
    pub history_failures: u64,
}

#[derive(Debug, Default)]
pub struct RouterCounters {
    relayed: AtomicU64,
    dropped_unknown: AtomicU64,
    dropped_malformed: AtomicU64,
    out_of_range: AtomicU64,
    history_failures: AtomicU64,
}

impl RouterCounters {
    pub fn snapshot(&self) -> RouterStats {
        RouterStats {
            relayed: self.relayed.load(Ordering::Relaxed),
            dropped_unknown: self.dropped_unknown.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
            history_failures: self.history_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub dictionary_key: String,
    pub measurement: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

pub struct ChannelRouter {
    dictionaries: Vec<Arc<Dictionary>>,
    clients: Arc<dyn ClientListener>,
    history: mpsc::Sender<HistoryRecord>,
    counters: Arc<RouterCounters>,
}

impl ChannelRouter {
    pub fn new(
        dictionaries: &[Arc<Dictionary>],
        clients: Arc<dyn ClientListener>,
        history: mpsc::Sender<HistoryRecord>,
        counters: Arc<RouterCounters>,
    ) -> Self {
        Self {
            dictionaries: dictionaries.to_vec(),
            clients,
            history,
            counters,
        }
    }

    /// Dictionary and measurement registered under `channel_key`. Channel keys are
    /// unique across a validated config, so the first hit is the only one.
    fn resolve(&self, channel_key: &str) -> Option<(&Dictionary, &Measurement)> {
        self.dictionaries.iter().find_map(|dictionary| {
            dictionary
                .measurement_for_channel(channel_key)
                .map(|measurement| (dictionary.as_ref(), measurement))
        })
    }

    pub async fn route(&self, message: BrokerMessage) {
        let Some((dictionary, measurement)) = self.resolve(&message.topic) else {
            self.counters.dropped_unknown.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(topic = %message.topic, "Dropping message on unregistered channel");
            return;
        };

        let received_at = chrono::Utc::now().timestamp_millis();
        let frame = match TelemetryFrame::decode(&message.topic, &message.payload, received_at) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic = %message.topic, error = %e, "Dropping malformed telemetry payload");
                return;
            }
        };

        let schema = measurement.primary();
        if schema.is_out_of_range(frame.value) {
            self.counters.out_of_range.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                channel = %frame.channel_key,
                value = frame.value,
                min = ?schema.min(),
                max = ?schema.max(),
                "Value outside declared range"
            );
        }

        let payload = frame.to_json();
        for client in self.clients.clients() {
            if let Err(e) = self.clients.send(client, &payload) {
                tracing::debug!(client, error = %e, "Skipping client");
            }
        }
        self.counters.relayed.fetch_add(1, Ordering::Relaxed);

        let record = HistoryRecord {
            dictionary_key: dictionary.key().to_string(),
            measurement: measurement.name.clone(),
            timestamp_ms: frame.timestamp,
            value: frame.value,
        };
        if self.history.send(record).await.is_err() {
            self.counters.history_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(channel = %frame.channel_key, "History writer is gone, sample not archived");
        }
    }

    /// Route messages one at a time until shutdown or the broker stream ends.
    pub fn spawn(
        self,
        mut inbound: mpsc::Receiver<BrokerMessage>,
    ) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    message = inbound.recv() => match message {
                        Some(message) => self.route(message).await,
                        None => {
                            tracing::warn!("Broker message stream closed");
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Channel router stopped");
        });
        (shutdown_tx, handle)
    }
}

/// Archive records in the order they were routed.
pub fn spawn_history_writer(
    repository: Arc<dyn TelemetryRepository>,
    counters: Arc<RouterCounters>,
) -> (mpsc::Sender<HistoryRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<HistoryRecord>(HISTORY_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = repository
                .write(
                    &record.dictionary_key,
                    &record.measurement,
                    record.timestamp_ms,
                    record.value,
                )
                .await
            {
                counters.history_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    dictionary = %record.dictionary_key,
                    measurement = %record.measurement,
                    error = %e,
                    "Failed to archive sample"
                );
            }
        }
    });
    (tx, handle)
}
