// Axum-backed listeners for the WebSocket and HTTP endpoints
use crate::application::backends::{
    ClientId, ClientListener, ClientSendError, ClientTransport, HttpListener, HttpTransport,
};
use crate::application::catalog::TelemetryCatalog;
use crate::infrastructure::websocket::ClientRegistry;
use crate::presentation::app_state::AppState;
use crate::presentation::{http_router, socket_router};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

/// A running `axum::serve` task with a graceful-shutdown trigger.
struct ServeHandle {
    local_addr: SocketAddr,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    abort: AbortHandle,
}

/// Aborts the serve task when dropped, so an abandoned `close` never leaves it running.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ServeHandle {
    async fn bind(host: &str, port: u16, router: Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", host, port))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(Self {
            local_addr,
            shutdown: Mutex::new(Some(shutdown_tx)),
            abort: task.abort_handle(),
            task: Mutex::new(Some(task)),
        })
    }

    async fn close(&self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.lock().ok().and_then(|mut s| s.take()) {
            let _ = shutdown.send(());
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            // Graceful shutdown waits on open connections; a caller's timeout drops us here.
            let _guard = AbortOnDrop(self.abort.clone());
            task.await.context("Listener task panicked")??;
        }
        Ok(())
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

pub struct WebSocketListener {
    server: ServeHandle,
    registry: Arc<ClientRegistry>,
}

#[async_trait]
impl ClientListener for WebSocketListener {
    fn local_addr(&self) -> SocketAddr {
        self.server.local_addr
    }

    fn clients(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    fn send(&self, client: ClientId, payload: &str) -> Result<(), ClientSendError> {
        self.registry.send(client, payload)
    }

    async fn close(&self) -> Result<()> {
        self.registry.disconnect_all();
        self.server.close().await
    }
}

#[derive(Default)]
pub struct WebSocketTransport;

#[async_trait]
impl ClientTransport for WebSocketTransport {
    async fn bind(&self, host: &str, port: u16) -> Result<Arc<dyn ClientListener>> {
        let registry = Arc::new(ClientRegistry::default());
        let server = ServeHandle::bind(host, port, socket_router(registry.clone())).await?;
        tracing::info!(addr = %server.local_addr, "WebSocket listener bound");
        Ok(Arc::new(WebSocketListener { server, registry }))
    }
}

pub struct AxumHttpListener {
    server: ServeHandle,
}

#[async_trait]
impl HttpListener for AxumHttpListener {
    fn local_addr(&self) -> SocketAddr {
        self.server.local_addr
    }

    async fn close(&self) -> Result<()> {
        self.server.close().await
    }
}

#[derive(Default)]
pub struct AxumHttpTransport;

#[async_trait]
impl HttpTransport for AxumHttpTransport {
    async fn bind(
        &self,
        host: &str,
        port: u16,
        catalog: TelemetryCatalog,
    ) -> Result<Arc<dyn HttpListener>> {
        let state = Arc::new(AppState { catalog });
        let server = ServeHandle::bind(host, port, http_router(state)).await?;
        tracing::info!(addr = %server.local_addr, "HTTP listener bound");
        Ok(Arc::new(AxumHttpListener { server }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::telemetry_repository::TelemetryRepository;
    use crate::application::testing::{RecordingHistory, void_av_dictionary};
    use crate::domain::telemetry::TelemetryFrame;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_http_endpoints() {
        let catalog = TelemetryCatalog::new(vec![Arc::new(void_av_dictionary())]);
        let listener = AxumHttpTransport
            .bind("127.0.0.1", 0, catalog.clone())
            .await
            .unwrap();
        let base = format!("http://{}", listener.local_addr());
        let client = reqwest::Client::new();

        let health = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let list: serde_json::Value = client
            .get(format!("{}/dictionaries", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list, serde_json::json!([{"name": "Void AV Bay", "key": "void_av"}]));

        let dictionary: serde_json::Value = client
            .get(format!("{}/dictionaries/void_av", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(dictionary["measurements"][0]["key"], "av_altitude");
        assert_eq!(dictionary["measurements"][1]["values"][0]["min"], 90.0);

        let missing = client.get(format!("{}/dictionaries/void_lander", base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let history_url = format!("{}/history/void_av/altitude?start=0&end=1000", base);
        let unavailable = client.get(&history_url).send().await.unwrap();
        assert_eq!(unavailable.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let history = Arc::new(RecordingHistory::default());
        history.write("void_av", "altitude", 500, 12000.0).await.unwrap();
        catalog.attach_history(history);

        let points: serde_json::Value = client
            .get(&history_url)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(points, serde_json::json!([{"timestamp": 500, "value": 12000.0}]));

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_fails() {
        let first = WebSocketTransport.bind("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().port();

        let second = WebSocketTransport.bind("127.0.0.1", port).await;
        assert!(second.is_err());

        first.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_window_edges() {
        let catalog = TelemetryCatalog::new(vec![Arc::new(void_av_dictionary())]);
        catalog.attach_history(Arc::new(RecordingHistory::default()));
        let listener = AxumHttpTransport
            .bind("127.0.0.1", 0, catalog)
            .await
            .unwrap();
        let base = format!("http://{}/history/void_av/altitude", listener.local_addr());
        let client = reqwest::Client::new();

        // default window below the earliest representable end
        let earliest = client
            .get(format!("{}?end={}", base, i64::MIN))
            .send()
            .await
            .unwrap();
        assert_eq!(earliest.status(), reqwest::StatusCode::OK);
        let points: serde_json::Value = earliest.json().await.unwrap();
        assert_eq!(points, serde_json::json!([]));

        let inverted = client
            .get(format!("{}?start=1000&end=0", base))
            .send()
            .await
            .unwrap();
        assert_eq!(inverted.status(), reqwest::StatusCode::BAD_REQUEST);

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_websocket_client_receives_frames() {
        let listener = WebSocketTransport.bind("127.0.0.1", 0).await.unwrap();
        let url = format!("ws://{}/", listener.local_addr());
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        // the session registers itself once the upgrade completes
        let mut clients = listener.clients();
        for _ in 0..100 {
            if !clients.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            clients = listener.clients();
        }
        assert_eq!(clients.len(), 1);

        let frame = TelemetryFrame::new("av_altitude", 12000.0, 1700000000000).to_json();
        listener.send(clients[0], &frame).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::Text(frame));

        listener.close().await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap();
        assert!(matches!(closed, Some(Ok(Message::Close(_))) | None));
        assert!(listener.clients().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_close_aborts_serve_task() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let router = Router::new().route(
            "/stall",
            axum::routing::get({
                let entered = entered.clone();
                move || async move {
                    entered.notify_one();
                    std::future::pending::<&'static str>().await
                }
            }),
        );
        let server = ServeHandle::bind("127.0.0.1", 0, router).await.unwrap();
        let url = format!("http://{}/stall", server.local_addr);
        tokio::spawn(async move {
            let _ = reqwest::get(url).await;
        });
        entered.notified().await;

        // the stalled request keeps graceful shutdown waiting
        let result = tokio::time::timeout(Duration::from_millis(50), server.close()).await;
        assert!(result.is_err());

        let mut finished = server.abort.is_finished();
        for _ in 0..100 {
            if finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            finished = server.abort.is_finished();
        }
        assert!(finished);
    }
}
