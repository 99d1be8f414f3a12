//! Depth compression transformer (SPEC_FULL §4.2). Applied only to `depth`
//! records whose combined `bids + asks` length exceeds `threshold`; it
//! truncates both sides to the top `top_n` levels (best prices first, which
//! the normalizer already sorted into) and records the compression ratio.

use crate::error::TransformError;
use crate::model::{MarketType, Metadata, MetadataValue, Payload};

use super::{TransformContext, Transformer};

pub struct DepthCompressionTransformer {
    threshold: usize,
    top_n: usize,
}

impl DepthCompressionTransformer {
    pub fn new(threshold: usize, top_n: usize) -> Self {
        Self { threshold, top_n }
    }
}

impl Default for DepthCompressionTransformer {
    /// Defaults from SPEC_FULL §4.2: threshold 200, top-N 50.
    fn default() -> Self {
        Self::new(200, 50)
    }
}

impl Transformer for DepthCompressionTransformer {
    fn name(&self) -> &str {
        "depth-compression"
    }

    fn transform(&self, mut record: crate::model::MarketData, _ctx: &TransformContext<'_>) -> Result<crate::model::MarketData, TransformError> {
        if !matches!(record.kind, MarketType::Depth) {
            return Ok(record);
        }

        let Payload::Depth { bids, asks } = &record.data else {
            return Ok(record);
        };

        let original_bids = bids.len();
        let original_asks = asks.len();
        if original_bids + original_asks <= self.threshold {
            return Ok(record);
        }

        let original_total = original_bids + original_asks;
        let Payload::Depth { bids, asks } = &mut record.data else {
            unreachable!("checked above");
        };
        bids.truncate(self.top_n);
        asks.truncate(self.top_n);
        let compressed_total = bids.len() + asks.len();

        let ratio = compressed_total as f64 / original_total as f64;
        let mut original_size = Metadata::new();
        original_size.insert("bids".to_string(), MetadataValue::Num(original_bids as f64));
        original_size.insert("asks".to_string(), MetadataValue::Num(original_asks as f64));

        record.metadata_insert("compressed", true);
        record.metadata_insert("compressionRatio", ratio);
        record
            .metadata
            .insert("originalSize".to_string(), MetadataValue::Map(original_size));

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarketData, MarketType, Metadata};
    use rust_decimal::Decimal;

    fn depth_with(n_bids: usize, n_asks: usize) -> MarketData {
        let bids = (0..n_bids)
            .map(|i| (Decimal::new(100 - i as i64, 0), Decimal::ONE))
            .collect();
        let asks = (0..n_asks)
            .map(|i| (Decimal::new(101 + i as i64, 0), Decimal::ONE))
            .collect();
        MarketData {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            kind: MarketType::Depth,
            timestamp: 1,
            received_at: 1,
            data: Payload::Depth { bids, asks },
            metadata: Metadata::new(),
        }
    }

    fn ctx() -> TransformContext<'static> {
        TransformContext {
            now_ms: 0,
            processing_version: "v1",
        }
    }

    #[test]
    fn compresses_oversized_depth_to_top_n() {
        let record = depth_with(300, 300);
        let out = DepthCompressionTransformer::default()
            .transform(record, &ctx())
            .unwrap();

        let Payload::Depth { bids, asks } = &out.data else {
            panic!("expected depth");
        };
        assert_eq!(bids.len(), 50);
        assert_eq!(asks.len(), 50);
        assert_eq!(out.metadata.get("compressed"), Some(&MetadataValue::Bool(true)));
        match out.metadata.get("originalSize") {
            Some(MetadataValue::Map(m)) => {
                assert_eq!(m.get("bids"), Some(&MetadataValue::Num(300.0)));
                assert_eq!(m.get("asks"), Some(&MetadataValue::Num(300.0)));
            }
            other => panic!("expected originalSize map, got {other:?}"),
        }
    }

    #[test]
    fn leaves_small_depth_untouched() {
        let record = depth_with(10, 10);
        let out = DepthCompressionTransformer::default()
            .transform(record, &ctx())
            .unwrap();
        let Payload::Depth { bids, asks } = &out.data else {
            panic!("expected depth");
        };
        assert_eq!(bids.len(), 10);
        assert_eq!(asks.len(), 10);
        assert!(!out.metadata.contains_key("compressed"));
    }

    #[test]
    fn ignores_non_depth_records() {
        let mut record = depth_with(1, 1);
        record.kind = MarketType::Trade;
        let out = DepthCompressionTransformer::default()
            .transform(record, &ctx())
            .unwrap();
        assert!(!out.metadata.contains_key("compressed"));
    }
}
