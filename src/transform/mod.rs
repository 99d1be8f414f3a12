//! Ordered transformer chain (SPEC_FULL §4.2).
//!
//! Each transformer is pure w.r.t. external state: given a record and a
//! [`TransformContext`], it returns a new record. A transformer that fails
//! does not abort the chain — the last good record is forwarded and the
//! failure is counted, mirroring the router's all-settled philosophy one
//! level down.

mod compression;
mod enrich;

pub use compression::DepthCompressionTransformer;
pub use enrich::EnrichmentTransformer;

use crate::error::TransformError;
use crate::model::MarketData;

/// Values a transformer needs but shouldn't reach into global state for.
/// `now_ms` is sampled once per processing batch so every transformer in a
/// single run agrees on "now".
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub now_ms: i64,
    pub processing_version: &'a str,
}

pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;
    fn transform(&self, record: MarketData, ctx: &TransformContext<'_>) -> Result<MarketData, TransformError>;
}

/// Runs a `MarketData` record through every registered transformer in
/// order. On a transformer error, the input to that step is forwarded
/// unchanged and the error is returned alongside the final record so the
/// caller (the manager) can count it without aborting the chain.
pub struct TransformerChain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    pub fn register(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    /// Runs the chain, returning the final record plus any errors raised
    /// along the way (one per failing transformer, in order).
    pub fn run(&self, mut record: MarketData, ctx: &TransformContext<'_>) -> (MarketData, Vec<TransformError>) {
        let mut errors = Vec::new();
        for transformer in &self.transformers {
            match transformer.transform(record.clone(), ctx) {
                Ok(next) => record = next,
                Err(e) => {
                    log::warn!("transformer `{}` failed, forwarding last good record: {e}", transformer.name());
                    errors.push(e);
                }
            }
        }
        (record, errors)
    }
}

impl Default for TransformerChain {
    fn default() -> Self {
        Self::new()
    }
}
