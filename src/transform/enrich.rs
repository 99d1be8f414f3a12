//! The enrichment transformer: adds `processedAt`, `latency`, `source`, and
//! `processingVersion` metadata (SPEC_FULL §4.2). `qualityScore` is a cheap
//! heuristic — 1.0 minus a small penalty for excessive ingress latency.

use crate::error::TransformError;
use crate::model::MarketData;

use super::{TransformContext, Transformer};

pub struct EnrichmentTransformer {
    source: String,
}

impl EnrichmentTransformer {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

impl Transformer for EnrichmentTransformer {
    fn name(&self) -> &str {
        "enrichment"
    }

    fn transform(&self, mut record: MarketData, ctx: &TransformContext<'_>) -> Result<MarketData, TransformError> {
        let latency_ms = (ctx.now_ms - record.received_at).max(0);
        let quality_score = (1.0 - (latency_ms as f64 / 10_000.0)).clamp(0.0, 1.0);

        record.metadata_insert("processedAt", ctx.now_ms as f64);
        record.metadata_insert("latency", latency_ms as f64);
        record.metadata_insert("qualityScore", quality_score);
        record.metadata_insert("processingVersion", ctx.processing_version);
        record.metadata_insert("source", self.source.as_str());

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarketType, Metadata, Payload, Side};
    use rust_decimal::Decimal;

    #[test]
    fn adds_expected_metadata_keys() {
        let record = MarketData {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            kind: MarketType::Trade,
            timestamp: 1,
            received_at: 50,
            data: Payload::Trade {
                price: Decimal::ONE,
                quantity: Decimal::ONE,
                side: Side::Buy,
            },
            metadata: Metadata::new(),
        };
        let ctx = TransformContext {
            now_ms: 100,
            processing_version: "v1",
        };
        let enriched = EnrichmentTransformer::new("gateio-adapter")
            .transform(record, &ctx)
            .unwrap();

        for key in ["processedAt", "latency", "qualityScore", "processingVersion", "source"] {
            assert!(enriched.metadata.contains_key(key), "missing metadata key {key}");
        }
    }
}
