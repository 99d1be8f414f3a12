//! Synthetic market data generator for standalone runs and manual testing.
//! Not a spec'd component — there is no exchange adapter in scope
//! (SPEC_FULL §1 Non-goals), so this stands in for one when running the
//! binary without a real feed.

use rand::Rng;

use crate::ingress::MarketSource;
use crate::model::RawMarketEvent;

const SYMBOLS: &[(&str, &str)] = &[("binance", "BTCUSDT"), ("binance", "ETHUSDT"), ("coinbase", "BTC-USD")];

pub struct SyntheticSource {
    interval: tokio::time::Interval,
}

impl SyntheticSource {
    pub fn new(period: std::time::Duration) -> Self {
        Self {
            interval: tokio::time::interval(period),
        }
    }
}

#[async_trait::async_trait]
impl MarketSource for SyntheticSource {
    async fn next_event(&mut self) -> Option<RawMarketEvent> {
        self.interval.tick().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let (exchange, symbol) = SYMBOLS[rand::rng().random_range(0..SYMBOLS.len())];
        let price = 20_000.0 + rand::rng().random_range(0.0..5_000.0);
        let quantity = rand::rng().random_range(0.0001..2.0);

        Some(RawMarketEvent {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            stream_kind: "trade".to_string(),
            timestamp: now_ms,
            received_at: now_ms,
            payload: serde_json::json!({
                "price": format!("{price:.2}"),
                "quantity": format!("{quantity:.6}"),
                "side": if rand::rng().random_bool(0.5) { "buy" } else { "sell" },
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn yields_a_well_formed_raw_event() {
        let mut source = SyntheticSource::new(Duration::from_millis(1));
        let event = source.next_event().await.expect("synthetic source never exhausts");
        assert!(SYMBOLS.iter().any(|(ex, sym)| *ex == event.exchange && *sym == event.symbol));
        assert_eq!(event.stream_kind, "trade");
    }
}
