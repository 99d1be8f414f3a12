//! WebSocket output channel (SPEC_FULL §4.4). Thin adapter: delivery just
//! hands the record to the proxy (§4.7) and reports how many subscribers
//! actually received it.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ChannelDeliveryError;
use crate::model::MarketData;
use crate::proxy::WebSocketProxy;

use super::{ChannelId, ChannelKind, ChannelMetrics, ChannelStatus, OutputChannel};

pub struct WebSocketOutputChannel {
    id: ChannelId,
    name: String,
    proxy: Arc<WebSocketProxy>,
    metrics: ChannelMetrics,
}

impl WebSocketOutputChannel {
    pub fn new(id: impl Into<String>, proxy: Arc<WebSocketProxy>) -> Self {
        Self {
            id: id.into(),
            name: "websocket".to_string(),
            proxy,
            metrics: ChannelMetrics::new(),
        }
    }
}

#[async_trait]
impl OutputChannel for WebSocketOutputChannel {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ChannelKind {
        ChannelKind::WebSocket
    }
    fn enabled(&self) -> bool {
        true
    }

    async fn deliver(&self, record: MarketData) -> Result<(), ChannelDeliveryError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let fanout = self.proxy.forward(record).await;
        self.metrics.record_delivery(now_ms, fanout as u64);
        Ok(())
    }

    async fn close(&self) {}

    fn status(&self) -> ChannelStatus {
        let mut status = self.metrics.snapshot(true);
        status.connected = self.proxy.connection_count() > 0;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarketType, Metadata, Payload, Side};
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn trade() -> MarketData {
        MarketData {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            kind: MarketType::Trade,
            timestamp: 1,
            received_at: 1,
            data: Payload::Trade {
                price: Decimal::ONE,
                quantity: Decimal::ONE,
                side: Side::Buy,
            },
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn delivering_with_no_subscribers_is_not_an_error() {
        let proxy = WebSocketProxy::new(10, 256, Duration::from_secs(30), Duration::from_secs(60));
        let channel = WebSocketOutputChannel::new("ws-out", proxy);
        assert!(channel.deliver(trade()).await.is_ok());
        assert_eq!(channel.status().messages_sent, 0);
    }
}
