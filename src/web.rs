// src/web.rs - WebSocket dashboard: broadcasts every dashboard message to clients
use crate::dashboard::{DashboardMessage, DashboardSink};
use crate::error::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::{routing::get, serve, Router};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const INDEX: &str = r#"<!doctype html>
<html><head><title>vigil</title></head>
<body><pre id="log"></pre>
<script>
const log = document.getElementById("log");
const ws = new WebSocket(`ws://${location.host}/ws`);
ws.onmessage = (m) => { log.textContent = m.data + "\n" + log.textContent; };
</script></body></html>"#;

/// Sink that fans dashboard messages out to every connected client
#[derive(Debug, Clone)]
pub struct WebSocketSink {
    tx: broadcast::Sender<String>,
}

impl WebSocketSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn clients(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Serve `/` and `/ws` on `bind_address` until `shutdown` fires
    pub async fn serve(&self, bind_address: &str, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = bind_address.parse().map_err(|e| {
            crate::error::MonitorError::Config(format!("Invalid bind address '{}': {}", bind_address, e))
        })?;
        let app = Router::new()
            .route("/", get(|| async { Html(INDEX) }))
            .route("/ws", get(ws_handler))
            .with_state(self.tx.clone());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Dashboard listening on http://{}", addr);
        serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DashboardSink for WebSocketSink {
    async fn deliver(&mut self, message: &DashboardMessage) -> Result<()> {
        let json = message.to_json()?;
        // No connected clients is not an error.
        if self.tx.send(json).is_err() {
            debug!("No dashboard clients connected");
        }
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(tx): State<broadcast::Sender<String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward(socket, tx.subscribe()))
}

async fn forward(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    debug!("Dashboard client connected");
    loop {
        match rx.recv().await {
            Ok(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Dashboard client lagged, skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Dashboard client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let mut sink = WebSocketSink::new(8);
        let mut rx = sink.tx.subscribe();
        assert_eq!(sink.clients(), 1);

        let message = DashboardMessage::Update(BTreeMap::from([("a".to_string(), 1.0)]));
        sink.deliver(&message).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"event":"update","data":{"a":1.0}}"#);
    }

    #[tokio::test]
    async fn test_no_clients_is_ok() {
        let mut sink = WebSocketSink::new(8);
        let message = DashboardMessage::Update(BTreeMap::new());
        assert!(sink.deliver(&message).await.is_ok());
    }
}
