//! Batching wrapper (SPEC_FULL §4.4). Accumulates records for a wrapped
//! channel and flushes on size or timeout, whichever comes first — the
//! same "queue + timer in a `tokio::select!` loop" shape the reference
//! codebase's `MasterSender` writer loop uses for its own ping/flush race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ChannelDeliveryError;
use crate::model::MarketData;

use super::{ChannelId, ChannelKind, ChannelMetrics, ChannelStatus, OutputChannel};

struct PendingBatch {
    items: Vec<MarketData>,
    first_enqueued_at: Option<Instant>,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            first_enqueued_at: None,
        }
    }

    fn push(&mut self, record: MarketData) {
        if self.items.is_empty() {
            self.first_enqueued_at = Some(Instant::now());
        }
        self.items.push(record);
    }

    fn take(&mut self) -> Vec<MarketData> {
        self.first_enqueued_at = None;
        std::mem::take(&mut self.items)
    }
}

pub struct BatchingChannel {
    id: ChannelId,
    name: String,
    wrapped: Arc<dyn OutputChannel>,
    batch_size: usize,
    pending: Arc<Mutex<PendingBatch>>,
    push_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    metrics: Arc<ChannelMetrics>,
    delivery_timeout: Duration,
    flusher: tokio::task::JoinHandle<()>,
}

impl BatchingChannel {
    /// `delivery_timeout` bounds each wrapped channel's `deliver` call per
    /// item in a flushed batch, same as the router applies per channel
    /// (SPEC_FULL §5/§7 — the batching wrapper's flush inherits the bound).
    pub fn new(
        id: impl Into<String>,
        wrapped: Arc<dyn OutputChannel>,
        batch_size: usize,
        flush_timeout: Duration,
        delivery_timeout: Duration,
    ) -> Self {
        let id = id.into();
        let pending = Arc::new(Mutex::new(PendingBatch::new()));
        let push_notify = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(ChannelMetrics::new());

        let flusher = tokio::spawn(run_flush_loop(
            wrapped.clone(),
            pending.clone(),
            push_notify.clone(),
            closed.clone(),
            metrics.clone(),
            batch_size,
            flush_timeout,
            delivery_timeout,
        ));

        Self {
            id,
            name: "batch".to_string(),
            wrapped,
            batch_size,
            pending,
            push_notify,
            closed,
            metrics,
            delivery_timeout,
            flusher,
        }
    }
}

impl Drop for BatchingChannel {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

async fn run_flush_loop(
    wrapped: Arc<dyn OutputChannel>,
    pending: Arc<Mutex<PendingBatch>>,
    push_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    metrics: Arc<ChannelMetrics>,
    batch_size: usize,
    flush_timeout: Duration,
    delivery_timeout: Duration,
) {
    loop {
        let deadline = {
            let guard = pending.lock();
            guard.first_enqueued_at.map(|t| t + flush_timeout)
        };

        let should_flush = match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => true,
                    _ = push_notify.notified() => pending.lock().items.len() >= batch_size,
                }
            }
            None => {
                push_notify.notified().await;
                pending.lock().items.len() >= batch_size
            }
        };

        if closed.load(Ordering::Relaxed) && pending.lock().items.is_empty() {
            return;
        }

        if should_flush || closed.load(Ordering::Relaxed) {
            flush_once(&wrapped, &pending, &metrics, delivery_timeout).await;
        }
    }
}

/// Flushes the pending batch, bounding each item's wrapped `deliver` call by
/// `delivery_timeout` the same way the router bounds its own per-channel
/// deliveries — a stalled wrapped channel can only ever cost one timeout per
/// item, never stall the whole flush indefinitely.
async fn flush_once(
    wrapped: &Arc<dyn OutputChannel>,
    pending: &Arc<Mutex<PendingBatch>>,
    metrics: &Arc<ChannelMetrics>,
    delivery_timeout: Duration,
) {
    let batch = pending.lock().take();
    if batch.is_empty() {
        return;
    }

    let deliveries = batch
        .into_iter()
        .map(|record| {
            let wrapped = wrapped.clone();
            async move {
                match tokio::time::timeout(delivery_timeout, wrapped.deliver(record)).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelDeliveryError::timeout(wrapped.id().to_string(), delivery_timeout.as_millis() as u64)),
                }
            }
        })
        .collect::<Vec<_>>();

    let results = join_all(deliveries).await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    for result in results {
        match result {
            Ok(()) => metrics.record_success(now_ms),
            Err(e) => {
                log::warn!("batched delivery to wrapped channel failed: {e}");
                metrics.record_error(now_ms, u64::MAX, 0);
            }
        }
    }
}

#[async_trait]
impl OutputChannel for BatchingChannel {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ChannelKind {
        ChannelKind::Batch
    }
    fn enabled(&self) -> bool {
        self.wrapped.enabled()
    }

    async fn deliver(&self, record: MarketData) -> Result<(), ChannelDeliveryError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ChannelDeliveryError::permanent(self.id.clone(), "channel closed"));
        }
        {
            let mut pending = self.pending.lock();
            pending.push(record);
        }
        self.push_notify.notify_one();
        Ok(())
    }

    /// Flushes remaining items synchronously before delegating, per
    /// SPEC_FULL §4.4.
    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.push_notify.notify_one();
        flush_once(&self.wrapped, &self.pending, &self.metrics, self.delivery_timeout).await;
        self.wrapped.close().await;
    }

    fn status(&self) -> ChannelStatus {
        self.metrics.snapshot(!self.closed.load(Ordering::Relaxed))
    }
}
