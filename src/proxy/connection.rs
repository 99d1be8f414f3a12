//! Per-connection state and I/O loop (SPEC_FULL §4.7).
//!
//! Shaped like the reference codebase's `MasterSender::try_connect`: a
//! `tokio::select!` race between inbound frames and outbound work, except
//! here the socket is server-accepted and the "outbound work" is a
//! drop-oldest send buffer fed by the router instead of a collector queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::protocol::{close_code, ClientMessage, ServerMessage, SubscriptionFilter};
use super::ConnectionRegistry;
use crate::model::MarketData;

pub type ConnectionId = Uuid;

/// Bounded outbound queue with drop-oldest overflow, per SPEC_FULL §4.7
/// ("the connection's own send buffer, not an unbounded one").
struct SendBuffer {
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
    notify: Notify,
}

impl SendBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            notify: Notify::new(),
        }
    }

    fn push(&self, message: Message) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<Message> {
        std::mem::take(&mut *self.queue.lock()).into_iter().collect()
    }
}

/// The registry's handle on one live connection. Cheaply cloneable and
/// shared between the connection's own I/O task and `forward()` callers.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub accepted_at_ms: i64,
    last_activity_ms: AtomicI64,
    filters: Mutex<Vec<SubscriptionFilter>>,
    buffer: SendBuffer,
}

impl ConnectionHandle {
    fn new(id: ConnectionId, now_ms: i64, send_buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            accepted_at_ms: now_ms,
            last_activity_ms: AtomicI64::new(now_ms),
            filters: Mutex::new(Vec::new()),
            buffer: SendBuffer::new(send_buffer_size),
        })
    }

    fn touch(&self, now_ms: i64) {
        self.last_activity_ms.store(now_ms, Ordering::Relaxed);
    }

    fn idle_for_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// `true` if any registered filter matches, or no filter has been
    /// registered yet (subscribe-all default before the first `subscribe`).
    pub fn wants(&self, record: &MarketData) -> bool {
        let filters = self.filters.lock();
        filters.is_empty() || filters.iter().any(|f| f.matches(record))
    }

    pub fn enqueue_data(&self, record: MarketData) {
        if let Ok(text) = serde_json::to_string(&ServerMessage::Data(record)) {
            self.buffer.push(Message::Text(text.into()));
        }
    }

    fn handle_client_text(&self, text: &str) -> Result<(), String> {
        let message: ClientMessage = serde_json::from_str(text).map_err(|e| e.to_string())?;
        match message {
            ClientMessage::Subscribe { filter } => {
                self.filters.lock().push(filter.clone());
                self.reply(ServerMessage::subscribed(filter));
            }
            ClientMessage::Unsubscribe { filter } => {
                self.filters.lock().retain(|f| f != &filter);
                self.reply(ServerMessage::unsubscribed(filter));
            }
            ClientMessage::Ping => {
                self.reply(ServerMessage::pong());
            }
        }
        Ok(())
    }

    fn reply(&self, message: ServerMessage) {
        if let Ok(text) = serde_json::to_string(&message) {
            self.buffer.push(Message::Text(text.into()));
        }
    }
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }))
}

/// Drives one accepted connection until it closes, then removes itself
/// from the registry.
pub async fn run_connection(
    ws: WebSocketStream<TcpStream>,
    handle: Arc<ConnectionHandle>,
    registry: Arc<ConnectionRegistry>,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
) {
    let (mut write, mut read) = ws.split();
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        handle.touch(now_ms);
                        if let Err(cause) = handle.handle_client_text(&text) {
                            log::debug!("connection {} sent an unparseable frame: {cause}", handle.id);
                            let _ = write.send(close_frame(close_code::PROTOCOL_ERROR, "malformed control frame")).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        handle.touch(chrono::Utc::now().timestamp_millis());
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("connection {} read error: {e}", handle.id);
                        break;
                    }
                }
            }
            _ = handle.buffer.notify.notified() => {
                for message in handle.buffer.drain() {
                    if write.send(message).await.is_err() {
                        registry.remove(&handle.id);
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if handle.idle_for_ms(now_ms) > connection_timeout.as_millis() as i64 {
                    let _ = write.send(close_frame(close_code::IDLE_TIMEOUT, "idle timeout")).await;
                    break;
                }
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = write.send(close_frame(close_code::NORMAL, "closing")).await;
    registry.remove(&handle.id);
}

pub(super) fn new_handle(id: ConnectionId, now_ms: i64, send_buffer_size: usize) -> Arc<ConnectionHandle> {
    ConnectionHandle::new(id, now_ms, send_buffer_size)
}
