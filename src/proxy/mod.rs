//! WebSocket proxy (SPEC_FULL §4.7): accepts subscriber connections over a
//! plain TCP listener, tracks per-connection filters and send buffers, and
//! fans normalized records out to whichever connections want them.

mod connection;
mod protocol;

pub use connection::ConnectionId;
pub use protocol::{close_code, ClientMessage, ServerMessage, SubscriptionFilter};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use connection::{new_handle, run_connection, ConnectionHandle};
use crate::model::MarketData;

/// Live connections, keyed by id. Reader-preferring: `forward()` only ever
/// reads it, registration/removal briefly takes the write lock.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
        })
    }

    fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.connections.write().insert(handle.id, handle);
    }

    pub(crate) fn remove(&self, id: &ConnectionId) {
        self.connections.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct WebSocketProxy {
    registry: Arc<ConnectionRegistry>,
    max_connections: usize,
    send_buffer_size: usize,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
    accepted_total: AtomicUsize,
    rejected_total: AtomicUsize,
}

impl WebSocketProxy {
    pub fn new(max_connections: usize, send_buffer_size: usize, heartbeat_interval: Duration, connection_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::new(),
            max_connections,
            send_buffer_size,
            heartbeat_interval,
            connection_timeout,
            accepted_total: AtomicUsize::new(0),
            rejected_total: AtomicUsize::new(0),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn accepted_total(&self) -> usize {
        self.accepted_total.load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected_total.load(Ordering::Relaxed)
    }

    /// Binds `addr` and accepts connections until the listener errors.
    /// Spawned as a background task by the entry point; never returns on
    /// the happy path.
    pub async fn listen(self: Arc<Self>, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("websocket proxy listening on {addr}");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("proxy accept error: {e}");
                    continue;
                }
            };
            let proxy = self.clone();
            tokio::spawn(async move {
                proxy.accept_one(stream, peer).await;
            });
        }
    }

    async fn accept_one(self: Arc<Self>, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        if self.registry.len() >= self.max_connections {
            self.rejected_total.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut ws) = accept_async(stream).await {
                use futures_util::SinkExt;
                let _ = ws
                    .send(tokio_tungstenite::tungstenite::Message::Close(Some(
                        tokio_tungstenite::tungstenite::protocol::CloseFrame {
                            code: close_code::CAPACITY_EXCEEDED.into(),
                            reason: "max connections reached".into(),
                        },
                    )))
                    .await;
            }
            return;
        }

        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                log::debug!("websocket handshake with {peer} failed: {e}");
                return;
            }
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let id = uuid::Uuid::new_v4();
        let handle = new_handle(id, now_ms, self.send_buffer_size);
        self.registry.insert(handle.clone());
        self.accepted_total.fetch_add(1, Ordering::Relaxed);
        log::debug!("accepted connection {id} from {peer}");

        run_connection(ws, handle, self.registry.clone(), self.heartbeat_interval, self.connection_timeout).await;
    }

    /// Fans `record` out to every connection whose filters want it.
    /// Returns the number of connections actually reached.
    pub async fn forward(&self, record: MarketData) -> usize {
        let connections = self.registry.connections.read();
        let mut reached = 0;
        for handle in connections.values() {
            if handle.wants(&record) {
                handle.enqueue_data(record.clone());
                reached += 1;
            }
        }
        reached
    }
}
