//! Pub/sub output channel (SPEC_FULL §4.4).
//!
//! Builds a deterministic topic name from `(prefix, exchange, type)`,
//! attaches metadata as string-typed message attributes, and publishes
//! once per `deliver` call. The transport itself is abstracted behind
//! [`PubSubTransport`] so this design does not take a hard dependency on
//! one message broker's wire client — an [`InProcessBroker`] is provided
//! for tests and standalone runs, the same role the reference codebase's
//! `MasterPool` demo mode plays for its own outbound connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ChannelDeliveryError;
use crate::model::MarketData;

use super::{ChannelId, ChannelKind, ChannelMetrics, ChannelStatus, OutputChannel};

/// One published message, as a pub/sub transport would see it.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub attributes: HashMap<String, String>,
    pub body: MarketData,
}

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, message: PublishedMessage) -> Result<(), String>;
}

/// Process-local transport: holds published messages in memory. Used by
/// tests and by standalone runs where no external broker is configured.
#[derive(Default)]
pub struct InProcessBroker {
    published: Mutex<Vec<PublishedMessage>>,
}

impl InProcessBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn drain(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.published.lock())
    }
}

#[async_trait]
impl PubSubTransport for InProcessBroker {
    async fn publish(&self, message: PublishedMessage) -> Result<(), String> {
        self.published.lock().push(message);
        Ok(())
    }
}

pub struct PubSubChannel {
    id: ChannelId,
    name: String,
    topic_prefix: String,
    circuit_breaker_threshold: u64,
    circuit_cooldown_ms: i64,
    transport: Arc<dyn PubSubTransport>,
    processing_version: String,
    channel_id_attr: String,
    metrics: ChannelMetrics,
    clock: AtomicI64,
}

impl PubSubChannel {
    pub fn new(id: impl Into<String>, topic_prefix: impl Into<String>, transport: Arc<dyn PubSubTransport>) -> Self {
        let id = id.into();
        Self {
            channel_id_attr: id.clone(),
            id,
            name: "pubsub".to_string(),
            topic_prefix: topic_prefix.into(),
            circuit_breaker_threshold: 5,
            circuit_cooldown_ms: 30_000,
            transport,
            processing_version: "1.0".to_string(),
            metrics: ChannelMetrics::new(),
            clock: AtomicI64::new(0),
        }
    }

    fn now(&self) -> i64 {
        self.clock.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OutputChannel for PubSubChannel {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ChannelKind {
        ChannelKind::PubSub
    }
    fn enabled(&self) -> bool {
        true
    }

    async fn deliver(&self, record: MarketData) -> Result<(), ChannelDeliveryError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.clock.store(now_ms, Ordering::Relaxed);

        if self.metrics.circuit_open(now_ms, self.circuit_cooldown_ms) {
            return Err(ChannelDeliveryError::transient(self.id.clone(), "circuit breaker open"));
        }

        let topic = record.topic_name(&self.topic_prefix);
        let mut attributes = HashMap::new();
        attributes.insert("exchange".to_string(), record.exchange.clone());
        attributes.insert("symbol".to_string(), record.symbol.clone());
        attributes.insert("type".to_string(), record.kind.wire_tag());
        attributes.insert("timestamp".to_string(), record.timestamp.to_string());
        attributes.insert("source".to_string(), record
            .metadata
            .get("source")
            .and_then(|v| v.as_attribute_string())
            .unwrap_or_default());
        attributes.insert("channelId".to_string(), self.channel_id_attr.clone());
        attributes.insert("processingVersion".to_string(), self.processing_version.clone());

        let message = PublishedMessage {
            topic,
            attributes,
            body: record,
        };

        match self.transport.publish(message).await {
            Ok(()) => {
                self.metrics.record_success(now_ms);
                Ok(())
            }
            Err(cause) => {
                self.metrics
                    .record_error(now_ms, self.circuit_breaker_threshold, self.circuit_cooldown_ms);
                Err(ChannelDeliveryError::transient(self.id.clone(), cause))
            }
        }
    }

    async fn close(&self) {}

    fn status(&self) -> ChannelStatus {
        self.metrics.snapshot(true)
    }
}
