//! Wire protocol for the WebSocket proxy (SPEC_FULL §4.7, §6). Every frame
//! is JSON text, mirroring the reference codebase's `MasterSender` control
//! plane (`{"op":"ping"}` and friends) but reshaped for subscriber-facing
//! use instead of a master-connection login handshake.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::MarketData;

/// A client-supplied filter: `{exchanges?, symbols?, types?}`. Match is AND
/// across categories, OR within a category — an absent or empty set means
/// "any" for that category (SPEC_FULL §3 "Subscription").
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanges: Option<HashSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<HashSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<HashSet<String>>,
}

impl SubscriptionFilter {
    /// `true` if this filter has no categories set — the subscribe-all
    /// state a fresh connection starts in (SPEC_FULL §9 Open Question 2).
    pub fn is_empty(&self) -> bool {
        self.exchanges.as_ref().is_none_or(|s| s.is_empty())
            && self.symbols.as_ref().is_none_or(|s| s.is_empty())
            && self.types.as_ref().is_none_or(|s| s.is_empty())
    }

    pub fn matches(&self, record: &MarketData) -> bool {
        if let Some(exchanges) = &self.exchanges {
            if !exchanges.is_empty() && !exchanges.iter().any(|e| e.eq_ignore_ascii_case(&record.exchange)) {
                return false;
            }
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.is_empty() && !symbols.iter().any(|s| s.eq_ignore_ascii_case(&record.symbol)) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.is_empty() {
                let tag = record.kind.wire_tag();
                if !types.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                    return false;
                }
            }
        }
        true
    }
}

/// Client → server control messages (SPEC_FULL §6): `{"op":"subscribe",
/// "filter":{...}}`, `{"op":"unsubscribe","filter":{...}}`, `{"op":"ping"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        filter: SubscriptionFilter,
    },
    Unsubscribe {
        #[serde(default)]
        filter: SubscriptionFilter,
    },
    Ping,
}

/// Server → client messages. Data frames are flattened so the wire shape is
/// exactly `{"type":"trade","exchange":...,"symbol":...,"timestamp":...,
/// "data":{...},"metadata":{...}}` per SPEC_FULL §6, not wrapped in an
/// envelope field.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Data(#[serde(flatten)] MarketData),
    Subscribed { ack: &'static str, filter: SubscriptionFilter },
    Unsubscribed { ack: &'static str, filter: SubscriptionFilter },
    Pong { op: &'static str },
}

impl ServerMessage {
    pub fn subscribed(filter: SubscriptionFilter) -> Self {
        ServerMessage::Subscribed { ack: "subscribed", filter }
    }

    pub fn unsubscribed(filter: SubscriptionFilter) -> Self {
        ServerMessage::Unsubscribed { ack: "unsubscribed", filter }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong { op: "pong" }
    }
}

/// Close codes, per SPEC_FULL §4.7/§6.
pub mod close_code {
    /// Normal, client- or server-initiated shutdown.
    pub const NORMAL: u16 = 1000;
    /// No client activity for `connectionTimeout`.
    pub const IDLE_TIMEOUT: u16 = 4000;
    /// `maxConnections` was already reached when the socket was accepted.
    pub const CAPACITY_EXCEEDED: u16 = 4001;
    /// A client frame could not be parsed as a [`ClientMessage`].
    pub const PROTOCOL_ERROR: u16 = 4002;
}
