//! Output channels: the uniform `{deliver, close, status}` capability set
//! every sink implements (SPEC_FULL §3, §4.4).

mod batch;
mod cache;
mod pubsub;
mod websocket;

pub use batch::BatchingChannel;
pub use cache::{CacheChannel, CacheStore, InMemoryCacheStore, RedisCacheStore};
pub use pubsub::{InProcessBroker, PubSubChannel, PubSubTransport};
pub use websocket::WebSocketOutputChannel;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ChannelDeliveryError;
use crate::model::MarketData;

pub type ChannelId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    PubSub,
    WebSocket,
    Cache,
    Batch,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub connected: bool,
    pub messages_sent: u64,
    pub errors: u64,
    pub last_activity_ms: Option<i64>,
    pub health: Health,
}

/// The capability set every output sink implements (SPEC_FULL §3).
///
/// Delivery must be idempotent w.r.t. the channel's own retry logic — the
/// core does no implicit retry (SPEC_FULL §4.4).
#[async_trait]
pub trait OutputChannel: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn kind(&self) -> ChannelKind;
    fn enabled(&self) -> bool;

    async fn deliver(&self, record: MarketData) -> Result<(), ChannelDeliveryError>;
    async fn close(&self);
    fn status(&self) -> ChannelStatus;
}

/// Shared bookkeeping every channel implementation composes: message/error
/// counters, last-activity timestamp, a closed flag, and the consecutive-
/// error circuit breaker (SPEC_FULL §7 "ChannelDeliveryError").
pub(crate) struct ChannelMetrics {
    messages_sent: AtomicU64,
    errors: AtomicU64,
    last_activity_ms: Mutex<Option<i64>>,
    consecutive_errors: AtomicU64,
    circuit_opened_at_ms: Mutex<Option<i64>>,
}

impl ChannelMetrics {
    pub(crate) fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_activity_ms: Mutex::new(None),
            consecutive_errors: AtomicU64::new(0),
            circuit_opened_at_ms: Mutex::new(None),
        }
    }

    pub(crate) fn record_success(&self, now_ms: i64) {
        self.record_delivery(now_ms, 1);
    }

    /// Like [`record_success`](Self::record_success), but credits
    /// `fanout_count` messages at once — the WebSocket channel's
    /// `messagesSent` counts subscribers actually reached, not `deliver`
    /// calls (SPEC_FULL §4.4).
    pub(crate) fn record_delivery(&self, now_ms: i64, fanout_count: u64) {
        self.messages_sent.fetch_add(fanout_count, Ordering::Relaxed);
        self.consecutive_errors.store(0, Ordering::Relaxed);
        *self.last_activity_ms.lock() = Some(now_ms);
        *self.circuit_opened_at_ms.lock() = None;
    }

    pub(crate) fn record_error(&self, now_ms: i64, circuit_breaker_threshold: u64, _cooldown_ms: i64) -> Health {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_activity_ms.lock() = Some(now_ms);

        if consecutive >= circuit_breaker_threshold {
            let mut opened_at = self.circuit_opened_at_ms.lock();
            if opened_at.is_none() {
                *opened_at = Some(now_ms);
            }
            Health::Unhealthy
        } else {
            Health::Degraded
        }
    }

    /// `true` while the circuit breaker is open and the cooldown has not
    /// yet elapsed — deliveries should short-circuit without attempting
    /// the transport.
    pub(crate) fn circuit_open(&self, now_ms: i64, cooldown_ms: i64) -> bool {
        match *self.circuit_opened_at_ms.lock() {
            Some(opened_at) => now_ms - opened_at < cooldown_ms,
            None => false,
        }
    }

    pub(crate) fn snapshot(&self, connected: bool) -> ChannelStatus {
        let errors = self.errors.load(Ordering::Relaxed);
        let consecutive = self.consecutive_errors.load(Ordering::Relaxed);
        let health = if consecutive == 0 {
            Health::Healthy
        } else if self.circuit_opened_at_ms.lock().is_some() {
            Health::Unhealthy
        } else {
            Health::Degraded
        };
        ChannelStatus {
            connected,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            errors,
            last_activity_ms: *self.last_activity_ms.lock(),
            health,
        }
    }
}
