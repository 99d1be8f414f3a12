//! Validates and canonicalizes a raw exchange message into a [`MarketData`]
//! record (SPEC_FULL §4.1). Stateless; safe to call concurrently — it reads
//! nothing but its argument and the wall clock.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{ConversionError, NormalizeError, ValidationError};
use crate::model::{DepthLevel, MarketData, MarketType, Metadata, Payload, RawMarketEvent, Side};

/// Event timestamps outside `[now - 24h, now + 60s]` are rejected as
/// implausible (SPEC_FULL §4.1).
const PLAUSIBILITY_PAST_MS: i64 = 24 * 60 * 60 * 1000;
const PLAUSIBILITY_FUTURE_MS: i64 = 60 * 1000;

/// Allowed clock skew between an event's own timestamp and the time the
/// adapter says it received it.
const CLOCK_SKEW_MS: i64 = 5_000;

pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Projects a raw adapter event into a canonical [`MarketData`] record.
    pub fn normalize(&self, raw: &RawMarketEvent, now_ms: i64) -> Result<MarketData, NormalizeError> {
        if raw.exchange.trim().is_empty() {
            return Err(ValidationError::new("exchange", "non-empty string", "\"\"").into());
        }
        if raw.symbol.trim().is_empty() {
            return Err(ValidationError::new("symbol", "non-empty string", "\"\"").into());
        }

        let kind = MarketType::from_stream_hint(&raw.stream_kind).ok_or_else(|| {
            ValidationError::new(
                "type",
                "one of trade|ticker|depth|aggTrade|kline_<interval>",
                raw.stream_kind.clone(),
            )
        })?;

        validate_timestamp(raw.timestamp, now_ms)?;
        if raw.received_at < raw.timestamp - CLOCK_SKEW_MS {
            return Err(ValidationError::new(
                "receivedAt",
                format!(">= timestamp - {CLOCK_SKEW_MS}"),
                raw.received_at.to_string(),
            )
            .into());
        }

        let data = decode_payload(&kind, &raw.payload)?;
        check_price_consistency(&kind, &data)?;

        Ok(MarketData {
            exchange: raw.exchange.clone(),
            symbol: raw.symbol.to_uppercase(),
            kind,
            timestamp: raw.timestamp,
            received_at: raw.received_at,
            data,
            metadata: Metadata::new(),
        })
    }

    /// Re-checks an already-normalized record against the same invariants.
    /// `normalize(normalize(x)) == normalize(x)` (SPEC_FULL §8 property 5)
    /// holds because `validate` accepts exactly what `normalize` would have
    /// produced, and normalizing an already-canonical record is a no-op.
    pub fn validate(&self, record: &MarketData, now_ms: i64) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if record.exchange.trim().is_empty() {
            errors.push(ValidationError::new("exchange", "non-empty string", "\"\""));
        }
        if record.symbol.trim().is_empty() {
            errors.push(ValidationError::new("symbol", "non-empty string", "\"\""));
        }
        if record.symbol != record.symbol.to_uppercase() {
            errors.push(ValidationError::new(
                "symbol",
                "uppercase",
                record.symbol.clone(),
            ));
        }
        if let Err(e) = validate_timestamp(record.timestamp, now_ms) {
            errors.push(e);
        }
        if record.received_at < record.timestamp - CLOCK_SKEW_MS {
            errors.push(ValidationError::new(
                "receivedAt",
                format!(">= timestamp - {CLOCK_SKEW_MS}"),
                record.received_at.to_string(),
            ));
        }
        if let Err(e) = check_price_consistency(&record.kind, &record.data) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_timestamp(timestamp: i64, now_ms: i64) -> Result<(), ValidationError> {
    if timestamp <= 0 {
        return Err(ValidationError::new("timestamp", "> 0", timestamp.to_string()));
    }
    if timestamp < now_ms - PLAUSIBILITY_PAST_MS || timestamp > now_ms + PLAUSIBILITY_FUTURE_MS {
        return Err(ValidationError::new(
            "timestamp",
            format!("within [now-24h, now+60s] (now={now_ms})"),
            timestamp.to_string(),
        ));
    }
    Ok(())
}

fn parse_decimal(payload: &serde_json::Value, field: &str) -> Result<Decimal, ConversionError> {
    let raw = match payload.get(field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v @ serde_json::Value::Number(_)) => v.to_string(),
        Some(serde_json::Value::Null) | None => {
            return Err(ConversionError::new(field, "field missing"))
        }
        Some(other) => return Err(ConversionError::new(field, format!("unexpected JSON type: {other}"))),
    };
    let value = Decimal::from_str(raw.trim()).map_err(|e| ConversionError::new(field, e))?;
    if value.is_sign_negative() {
        return Err(ConversionError::new(field, "negative value not allowed"));
    }
    Ok(value)
}

fn parse_depth_levels(payload: &serde_json::Value, field: &str) -> Result<Vec<DepthLevel>, ConversionError> {
    let arr = payload
        .get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ConversionError::new(field, "field missing or not an array"))?;

    let mut levels = Vec::with_capacity(arr.len());
    for (i, level) in arr.iter().enumerate() {
        let pair = level
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| ConversionError::new(format!("{field}[{i}]"), "expected [price, qty]"))?;
        let price = Decimal::from_str(pair[0].as_str().unwrap_or_default().trim())
            .map_err(|e| ConversionError::new(format!("{field}[{i}].price"), e))?;
        let qty = Decimal::from_str(pair[1].as_str().unwrap_or_default().trim())
            .map_err(|e| ConversionError::new(format!("{field}[{i}].qty"), e))?;
        if price.is_sign_negative() || qty.is_sign_negative() {
            return Err(ConversionError::new(format!("{field}[{i}]"), "negative price/qty"));
        }
        levels.push((price, qty));
    }
    Ok(levels)
}

fn decode_payload(kind: &MarketType, payload: &serde_json::Value) -> Result<Payload, ConversionError> {
    match kind {
        MarketType::Trade | MarketType::AggTrade => {
            let side = match payload.get("side").and_then(|v| v.as_str()) {
                Some("buy") => Side::Buy,
                Some("sell") => Side::Sell,
                other => {
                    return Err(ConversionError::new(
                        "side",
                        format!("expected \"buy\" or \"sell\", got {other:?}"),
                    ))
                }
            };
            Ok(Payload::Trade {
                price: parse_decimal(payload, "price")?,
                quantity: parse_decimal(payload, "quantity")?,
                side,
            })
        }
        MarketType::Ticker => Ok(Payload::Ticker {
            bid: parse_decimal(payload, "bid")?,
            ask: parse_decimal(payload, "ask")?,
            last: parse_decimal(payload, "last")?,
        }),
        MarketType::Depth => {
            let mut bids = parse_depth_levels(payload, "bids")?;
            let mut asks = parse_depth_levels(payload, "asks")?;
            // Canonical order: bids desc by price, asks asc by price.
            bids.sort_by(|a, b| b.0.cmp(&a.0));
            asks.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Payload::Depth { bids, asks })
        }
        MarketType::Kline { .. } => Ok(Payload::Kline {
            open: parse_decimal(payload, "open")?,
            high: parse_decimal(payload, "high")?,
            low: parse_decimal(payload, "low")?,
            close: parse_decimal(payload, "close")?,
            volume: parse_decimal(payload, "volume")?,
        }),
    }
}

/// `kline`: `low <= min(open,close) <= max(open,close) <= high`.
/// `ticker`: `bid < ask`.
fn check_price_consistency(kind: &MarketType, data: &Payload) -> Result<(), ValidationError> {
    match (kind, data) {
        (MarketType::Kline { .. }, Payload::Kline { open, high, low, close, .. }) => {
            let lo = (*open).min(*close);
            let hi = (*open).max(*close);
            if !(*low <= lo && lo <= hi && hi <= *high) {
                return Err(ValidationError::new(
                    "kline.prices",
                    "low <= min(open,close) <= max(open,close) <= high",
                    format!("open={open} high={high} low={low} close={close}"),
                ));
            }
            Ok(())
        }
        (MarketType::Ticker, Payload::Ticker { bid, ask, .. }) => {
            if bid >= ask {
                return Err(ValidationError::new("ticker.bid", format!("< ask ({ask})"), bid.to_string()));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_trade(timestamp: i64) -> RawMarketEvent {
        RawMarketEvent {
            exchange: "binance".into(),
            symbol: "btcusdt".into(),
            stream_kind: "trade".into(),
            timestamp,
            received_at: timestamp,
            payload: json!({"price": "50000.5", "quantity": "0.001", "side": "buy"}),
        }
    }

    #[test]
    fn normalizes_valid_trade() {
        let now = 1_700_000_000_000;
        let raw = raw_trade(now - 1000);
        let md = Normalizer::new().normalize(&raw, now).unwrap();
        assert_eq!(md.symbol, "BTCUSDT");
        match md.data {
            Payload::Trade { side, .. } => assert_eq!(side, Side::Buy),
            _ => panic!("expected trade payload"),
        }
    }

    #[test]
    fn rejects_negative_timestamp() {
        let now = 1_700_000_000_000;
        let raw = raw_trade(-1);
        let err = Normalizer::new().normalize(&raw, now).unwrap_err();
        match err {
            NormalizeError::Validation(v) => assert_eq!(v.field, "timestamp"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn rejects_implausible_future_timestamp() {
        let now = 1_700_000_000_000;
        let raw = raw_trade(now + 10 * 60 * 1000);
        assert!(Normalizer::new().normalize(&raw, now).is_err());
    }

    #[test]
    fn depth_is_sorted_after_normalization() {
        let now = 1_700_000_000_000;
        let raw = RawMarketEvent {
            exchange: "binance".into(),
            symbol: "ethusdt".into(),
            stream_kind: "depth".into(),
            timestamp: now,
            received_at: now,
            payload: json!({
                "bids": [["100.0","1"], ["102.0","1"], ["101.0","1"]],
                "asks": [["105.0","1"], ["103.0","1"], ["104.0","1"]],
            }),
        };
        let md = Normalizer::new().normalize(&raw, now).unwrap();
        match md.data {
            Payload::Depth { bids, asks } => {
                assert_eq!(bids[0].0, Decimal::from_str("102.0").unwrap());
                assert_eq!(asks[0].0, Decimal::from_str("103.0").unwrap());
            }
            _ => panic!("expected depth payload"),
        }
    }

    #[test]
    fn ticker_requires_bid_below_ask() {
        let now = 1_700_000_000_000;
        let raw = RawMarketEvent {
            exchange: "binance".into(),
            symbol: "ethusdt".into(),
            stream_kind: "ticker".into(),
            timestamp: now,
            received_at: now,
            payload: json!({"bid": "101.0", "ask": "100.0", "last": "100.5"}),
        };
        assert!(Normalizer::new().normalize(&raw, now).is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let now = 1_700_000_000_000;
        let raw = raw_trade(now - 1000);
        let first = Normalizer::new().normalize(&raw, now).unwrap();
        let errors = Normalizer::new().validate(&first, now);
        assert!(errors.is_ok(), "already-canonical record should re-validate clean: {errors:?}");
    }

    #[test]
    fn unknown_kline_interval_is_rejected() {
        let now = 1_700_000_000_000;
        let raw = RawMarketEvent {
            exchange: "binance".into(),
            symbol: "ethusdt".into(),
            stream_kind: "kline_7m".into(),
            timestamp: now,
            received_at: now,
            payload: json!({}),
        };
        assert!(Normalizer::new().normalize(&raw, now).is_err());
    }
}
