//! Typed error taxonomy for the pipeline (SPEC_FULL §7).
//!
//! `anyhow` remains the boundary type for the binary entry point and for
//! collaborators that cross an I/O boundary (config loading, socket
//! accept). Everything inside the pipeline itself is one of these
//! `thiserror`-derived enums so callers can match on failure category
//! instead of string-sniffing a message.

use thiserror::Error;

/// A record failed the normalizer's structural/semantic checks and was
/// dropped at ingress. Never retried.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("validation failed: field `{field}` expected {expected}, got {actual}")]
pub struct ValidationError {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Normalization failed while converting a raw field (usually a numeric
/// parse). Wraps the parse cause; same drop-and-count treatment as
/// [`ValidationError`].
#[derive(Debug, Error, Clone)]
#[error("conversion failed for field `{field}`: {cause}")]
pub struct ConversionError {
    pub field: String,
    pub cause: String,
}

impl ConversionError {
    pub fn new(field: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            field: field.into(),
            cause: cause.to_string(),
        }
    }
}

/// A transformer in the chain misbehaved. The chain continues forwarding
/// the last good record; this error is counted, never propagated.
#[derive(Debug, Error, Clone)]
#[error("transformer `{transformer}` failed: {cause}")]
pub struct TransformError {
    pub transformer: String,
    pub cause: String,
}

/// A routing rule's condition evaluator panicked or returned an error. That
/// rule is skipped for this record only.
#[derive(Debug, Error, Clone)]
#[error("rule `{rule}` condition evaluation failed: {cause}")]
pub struct RoutingError {
    pub rule: String,
    pub cause: String,
}

/// Whether a channel delivery failure is worth retrying upstream (by the
/// operator, not by the core — the core never implicitly retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailureKind {
    Transient,
    Permanent,
}

/// A channel's `deliver` call failed. `Timeout` is always `Transient`.
#[derive(Debug, Error, Clone)]
#[error("channel `{channel_id}` delivery failed ({kind:?}): {cause}")]
pub struct ChannelDeliveryError {
    pub channel_id: String,
    pub kind: DeliveryFailureKind,
    pub cause: String,
}

impl ChannelDeliveryError {
    pub fn transient(channel_id: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: DeliveryFailureKind::Transient,
            cause: cause.to_string(),
        }
    }

    pub fn permanent(channel_id: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: DeliveryFailureKind::Permanent,
            cause: cause.to_string(),
        }
    }

    pub fn timeout(channel_id: impl Into<String>, after_ms: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: DeliveryFailureKind::Transient,
            cause: format!("timed out after {after_ms}ms"),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DeliveryFailureKind::Transient
    }
}

/// Umbrella error returned by normalization. Kept as a distinct enum
/// (rather than folding into one giant pipeline error) so `Normalizer`'s
/// public signature stays narrow.
#[derive(Debug, Error, Clone)]
pub enum NormalizeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}
