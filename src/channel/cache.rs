//! Cache output channel (SPEC_FULL §4.4). Writes the record at
//! `{exchange}:{symbol}:{type}`, last-writer-wins. Retention is delegated
//! to the [`CacheStore`] collaborator: an in-memory implementation for
//! tests and standalone runs, and a Redis-backed one built on the
//! reference codebase's already-declared (but previously unused) `redis`
//! dependency.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;

use crate::error::ChannelDeliveryError;
use crate::model::MarketData;

use super::{ChannelId, ChannelKind, ChannelMetrics, ChannelStatus, OutputChannel};

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn put(&self, key: &str, value: &MarketData) -> Result<(), String>;
}

/// Default, dependency-free store: an `RwLock<HashMap>`. Suitable for tests
/// and for running the engine standalone without an external cache.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, MarketData>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<MarketData> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put(&self, key: &str, value: &MarketData) -> Result<(), String> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Redis-backed store using the async `tokio-comp` connection manager.
/// Retention (TTL/eviction policy) is Redis's to enforce — the core only
/// writes last-writer-wins; it does not set expirations here, mirroring
/// SPEC_FULL §4.4's "retention is delegated to the cache collaborator".
pub struct RedisCacheStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn put(&self, key: &str, value: &MarketData) -> Result<(), String> {
        let payload = serde_json::to_string(value).map_err(|e| e.to_string())?;
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, payload).await.map_err(|e| e.to_string())
    }
}

pub struct CacheChannel {
    id: ChannelId,
    name: String,
    store: Arc<dyn CacheStore>,
    circuit_breaker_threshold: u64,
    circuit_cooldown_ms: i64,
    metrics: ChannelMetrics,
}

impl CacheChannel {
    pub fn new(id: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            id: id.into(),
            name: "cache".to_string(),
            store,
            circuit_breaker_threshold: 5,
            circuit_cooldown_ms: 30_000,
            metrics: ChannelMetrics::new(),
        }
    }
}

#[async_trait]
impl OutputChannel for CacheChannel {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ChannelKind {
        ChannelKind::Cache
    }
    fn enabled(&self) -> bool {
        true
    }

    async fn deliver(&self, record: MarketData) -> Result<(), ChannelDeliveryError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if self.metrics.circuit_open(now_ms, self.circuit_cooldown_ms) {
            return Err(ChannelDeliveryError::transient(self.id.clone(), "circuit breaker open"));
        }

        let key = record.cache_key();
        match self.store.put(&key, &record).await {
            Ok(()) => {
                self.metrics.record_success(now_ms);
                Ok(())
            }
            Err(cause) => {
                self.metrics
                    .record_error(now_ms, self.circuit_breaker_threshold, self.circuit_cooldown_ms);
                Err(ChannelDeliveryError::transient(self.id.clone(), cause))
            }
        }
    }

    async fn close(&self) {}

    fn status(&self) -> ChannelStatus {
        self.metrics.snapshot(true)
    }
}
