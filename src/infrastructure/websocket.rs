// WebSocket client registry - per-client ordered outbound queues
use crate::application::backends::{ClientId, ClientSendError};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

const CLIENT_QUEUE_CAPACITY: usize = 256;

pub struct ClientRegistry {
    clients: RwLock<BTreeMap<ClientId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_capacity(CLIENT_QUEUE_CAPACITY)
    }
}

impl ClientRegistry {
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Add a client; frames queued for it arrive on the returned receiver.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(id, tx);
        }
        tracing::info!(client = id, "WebSocket client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        let removed = self
            .clients
            .write()
            .map(|mut clients| clients.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            tracing::info!(client = id, "WebSocket client disconnected");
        }
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients
            .read()
            .map(|clients| clients.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn send(&self, id: ClientId, payload: &str) -> Result<(), ClientSendError> {
        let sender = self
            .clients
            .read()
            .ok()
            .and_then(|clients| clients.get(&id).cloned())
            .ok_or(ClientSendError::Disconnected(id))?;

        match sender.try_send(payload.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client = id, "Client queue full, dropping frame");
                Err(ClientSendError::QueueFull(id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(id);
                Err(ClientSendError::Disconnected(id))
            }
        }
    }

    /// Drop every outbound queue, which ends each client's session.
    pub fn disconnect_all(&self) {
        if let Ok(mut clients) = self.clients.write() {
            clients.clear();
        }
    }
}
