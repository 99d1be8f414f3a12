//! Adapter boundary (SPEC_FULL §4.8). A [`MarketSource`] is the entire
//! surface an exchange adapter must implement to feed the pipeline — one
//! method, deliberately narrow, so adapters stay swappable without the
//! manager knowing anything about transports, reconnects, or wire formats.

use async_trait::async_trait;

use crate::manager::DataFlowManager;
use crate::model::RawMarketEvent;

#[async_trait]
pub trait MarketSource: Send {
    /// Returns the next raw event, or `None` once the source is exhausted
    /// (a closed demo generator, an adapter that has given up reconnecting).
    async fn next_event(&mut self) -> Option<RawMarketEvent>;
}

/// Pumps events from `source` into `manager.submit` until the source is
/// exhausted. Spawned as its own task per source by the entry point — this
/// is the only place a source and the manager ever touch.
pub async fn run_source(mut source: impl MarketSource, manager: std::sync::Arc<DataFlowManager>) {
    while let Some(event) = source.next_event().await {
        manager.submit(event);
    }
    log::info!("market source exhausted, no further events will be submitted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::RecordingChannel;
    use crate::config::IngressConfig;
    use crate::router::{Router, RoutingRule};
    use std::sync::Arc;

    struct FiniteSource {
        remaining: usize,
    }

    #[async_trait]
    impl MarketSource for FiniteSource {
        async fn next_event(&mut self) -> Option<RawMarketEvent> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(RawMarketEvent {
                exchange: "binance".into(),
                symbol: "BTCUSDT".into(),
                stream_kind: "trade".into(),
                timestamp: chrono::Utc::now().timestamp_millis(),
                received_at: chrono::Utc::now().timestamp_millis(),
                payload: serde_json::json!({"price": "100.0", "quantity": "1.0", "side": "buy"}),
            })
        }
    }

    #[tokio::test]
    async fn pumps_every_event_into_the_manager_then_returns() {
        let router = Arc::new(Router::new());
        let out = RecordingChannel::new("out");
        router.register_channel(out.clone());
        router.add_rule(RoutingRule::new("all", 0, Arc::new(|_| true), vec!["out".to_string()]));

        let manager = DataFlowManager::new(IngressConfig::default(), router);
        manager.start();

        run_source(FiniteSource { remaining: 5 }, manager.clone()).await;

        for _ in 0..50 {
            if out.received_count() == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(out.received_count(), 5);
        manager.stop().await;
    }
}
