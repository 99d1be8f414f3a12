//! Core data model shared by every stage of the pipeline.
//!
//! [`MarketData`] is the universal record: every adapter-facing input is
//! normalized into one before it ever reaches a transformer, a routing rule,
//! or a channel. Numeric payload fields are carried as [`rust_decimal::Decimal`]
//! rather than `f64` — the pipeline must never lose precision on a price or a
//! quantity in transit.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The kind of a market event.
///
/// `Kline` carries its interval (`"1m"`, `"5m"`, ...) so that `kline_1m`,
/// `kline_5m`, etc. round-trip through the wire as a single string segment
/// (see `MarketType::wire_tag`) while remaining one strongly typed variant
/// here rather than an open string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MarketType {
    Trade,
    Ticker,
    Depth,
    Kline { interval: String },
    #[serde(rename = "aggTrade")]
    AggTrade,
}

impl MarketType {
    /// The set of kline intervals the normalizer accepts. A closed set, per
    /// the normalizer's contract: unknown intervals are a `ConversionError`,
    /// not a silently-accepted passthrough.
    pub const SUPPORTED_KLINE_INTERVALS: &'static [&'static str] = &[
        "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "1w", "1M",
    ];

    /// Parses a stream-kind hint such as `"trade"`, `"depth"`, or
    /// `"kline_1m"` into a typed variant.
    pub fn from_stream_hint(hint: &str) -> Option<Self> {
        match hint {
            "trade" => Some(MarketType::Trade),
            "ticker" => Some(MarketType::Ticker),
            "depth" => Some(MarketType::Depth),
            "aggTrade" => Some(MarketType::AggTrade),
            other => other.strip_prefix("kline_").and_then(|interval| {
                Self::SUPPORTED_KLINE_INTERVALS
                    .contains(&interval)
                    .then(|| MarketType::Kline {
                        interval: interval.to_string(),
                    })
            }),
        }
    }

    /// The lowercase, single-segment wire representation used for pub/sub
    /// topic names and cache keys (e.g. `"kline_1m"`).
    pub fn wire_tag(&self) -> String {
        match self {
            MarketType::Trade => "trade".to_string(),
            MarketType::Ticker => "ticker".to_string(),
            MarketType::Depth => "depth".to_string(),
            MarketType::AggTrade => "aggtrade".to_string(),
            MarketType::Kline { interval } => format!("kline_{interval}"),
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_tag())
    }
}

/// A single depth level: `(price, quantity)`.
pub type DepthLevel = (Decimal, Decimal);

/// Type-dependent payload. Each variant covers exactly the fields the
/// normalizer requires for its `type` (see SPEC_FULL §4.1 "price
/// consistency").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Trade {
        price: Decimal,
        quantity: Decimal,
        side: Side,
    },
    Ticker {
        bid: Decimal,
        ask: Decimal,
        last: Decimal,
    },
    Depth {
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
    },
    Kline {
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// An open string-to-value map. Closed over a small set of tags rather than
/// reflective/dynamically-typed values, per SPEC_FULL §9.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Coerces the value into the string representation used by
    /// string-only transports (pub/sub message attributes). Returns `None`
    /// for nested maps, which such transports cannot carry.
    pub fn as_attribute_string(&self) -> Option<String> {
        match self {
            MetadataValue::Str(s) => Some(s.clone()),
            MetadataValue::Num(n) => Some(n.to_string()),
            MetadataValue::Bool(b) => Some(b.to_string()),
            MetadataValue::Map(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Num(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Open metadata map. `BTreeMap` keeps key order deterministic, which makes
/// golden-output tests and manual log inspection predictable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// The universal normalized record. See SPEC_FULL §3.
///
/// `camelCase` on the wire to match SPEC_FULL §6's documented JSON shape
/// (`receivedAt`, not `received_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub exchange: String,
    pub symbol: String,
    #[serde(flatten)]
    pub kind: MarketType,
    pub timestamp: i64,
    pub received_at: i64,
    pub data: Payload,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MarketData {
    /// `{exchange}:{symbol}:{type}` — uppercase exchange/symbol, lowercase
    /// type. Used as the cache key layout (SPEC_FULL §6).
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.exchange.to_uppercase(),
            self.symbol.to_uppercase(),
            self.kind.wire_tag()
        )
    }

    /// `{prefix}.{exchange}.{normalized_type}` — all-lowercase segments.
    /// Used as the deterministic pub/sub topic name (SPEC_FULL §6).
    pub fn topic_name(&self, prefix: &str) -> String {
        format!(
            "{}.{}.{}",
            prefix,
            self.exchange.to_lowercase(),
            self.kind.wire_tag()
        )
    }

    pub fn metadata_insert(&mut self, key: &str, value: impl Into<MetadataValue>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Raw adapter input, before normalization. This is the entire surface an
/// out-of-scope exchange adapter must produce (SPEC_FULL §4.1, §4.8).
#[derive(Debug, Clone)]
pub struct RawMarketEvent {
    pub exchange: String,
    pub symbol: String,
    /// Stream-kind hint, e.g. `"trade"`, `"depth"`, `"kline_1m"`.
    pub stream_kind: String,
    pub timestamp: i64,
    pub received_at: i64,
    pub payload: serde_json::Value,
}
