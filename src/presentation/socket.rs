// WebSocket session handler - streams telemetry frames to one client
use crate::infrastructure::websocket::ClientRegistry;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

pub async fn telemetry_socket(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<ClientRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, registry))
}

async fn client_session(socket: WebSocket, registry: Arc<ClientRegistry>) {
    let (id, mut outbound) = registry.register();
    let (mut sink, mut stream) = socket.split();

    let forward = async {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    };

    // Clients only listen; inbound frames are read to notice the close.
    let drain = async {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = drain => {}
    }

    registry.unregister(id);
}
