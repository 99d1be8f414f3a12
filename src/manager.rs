//! The `DataFlowManager` (SPEC_FULL §4): owns the ingress queue, the
//! backpressure state machine, and the single-consumer processing loop that
//! threads each record through normalization, transformation, and routing.
//!
//! The queue-plus-background-worker shape mirrors the reference codebase's
//! `MasterSender` reconnect loop: a `Mutex`-guarded piece of shared state, a
//! `Notify` to wake the consumer, and one spawned task that owns the loop
//! for as long as the manager is running.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::channel::{ChannelId, OutputChannel};
use crate::config::{BatchingConfig, IngressConfig};
use crate::model::RawMarketEvent;
use crate::normalizer::Normalizer;
use crate::router::{RouteOutcome, Router, RoutingRule};
use crate::transform::{TransformContext, Transformer, TransformerChain};

/// Upper bound on how long `stop()` waits for the queue to drain before
/// giving up and counting what's left as dropped (SPEC_FULL §5
/// "Cancellation").
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

struct QueuedEvent {
    raw: RawMarketEvent,
    enqueued_at_ms: i64,
}

#[derive(Default)]
struct ManagerCounters {
    processed: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
    validation_errors: AtomicU64,
    transform_errors: AtomicU64,
    routing_errors: AtomicU64,
}

/// Running max with exponential decay, used to approximate p95/p99 latency
/// without retaining the full sample set (SPEC_FULL §5 "bounded memory").
struct RunningQuantile {
    value: AtomicI64,
    decay: f64,
}

impl RunningQuantile {
    fn new(decay: f64) -> Self {
        Self {
            value: AtomicI64::new(0),
            decay,
        }
    }

    fn observe(&self, sample_ms: i64) {
        let current = self.value.load(Ordering::Relaxed);
        let next = if sample_ms >= current {
            sample_ms
        } else {
            ((current as f64) * self.decay) as i64
        };
        self.value.store(next, Ordering::Relaxed);
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerStats {
    pub queue_depth: usize,
    pub processed: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub validation_errors: u64,
    pub transform_errors: u64,
    pub routing_errors: u64,
    pub channel_errors: u64,
    pub backpressure_active: bool,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: i64,
    pub p99_latency_ms: i64,
}

pub struct DataFlowManager {
    normalizer: Normalizer,
    transformers: RwLock<TransformerChain>,
    router: Arc<Router>,
    queue: Mutex<VecDeque<QueuedEvent>>,
    queue_notify: Notify,
    config: IngressConfig,
    batching: BatchingConfig,
    monitor: Mutex<Option<Arc<crate::monitor::Monitor>>>,
    processing_version: String,
    backpressure_active: AtomicBool,
    counters: ManagerCounters,
    latency_total_ms: AtomicI64,
    latency_samples: AtomicU64,
    p95: RunningQuantile,
    p99: RunningQuantile,
    running: AtomicBool,
    stop_requested_at_ms: AtomicI64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DataFlowManager {
    /// Builds the manager around a shared [`Router`] and the ingress
    /// portion of the configuration. Equivalent to "initialize" in
    /// SPEC_FULL §4 — there is no further setup step before `start`.
    pub fn new(config: IngressConfig, router: Arc<Router>) -> Arc<Self> {
        Self::with_batching(config, BatchingConfig::default(), router)
    }

    /// Like [`new`](Self::new), but with explicit control over batching
    /// (SPEC_FULL §4.5/§5: "dequeues up to `batchSize` items ... or one
    /// item if disabled").
    pub fn with_batching(config: IngressConfig, batching: BatchingConfig, router: Arc<Router>) -> Arc<Self> {
        Arc::new(Self {
            normalizer: Normalizer,
            transformers: RwLock::new(TransformerChain::new()),
            router,
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            config,
            batching,
            monitor: Mutex::new(None),
            processing_version: "1.0".to_string(),
            backpressure_active: AtomicBool::new(false),
            counters: ManagerCounters::default(),
            latency_total_ms: AtomicI64::new(0),
            latency_samples: AtomicU64::new(0),
            p95: RunningQuantile::new(0.98),
            p99: RunningQuantile::new(0.99),
            running: AtomicBool::new(false),
            stop_requested_at_ms: AtomicI64::new(0),
            worker: Mutex::new(None),
        })
    }

    /// Feeds the manager's per-record processing events into `monitor`
    /// (SPEC_FULL §4.6 "Monitor consumes manager and channel events").
    /// Optional — a manager with no attached monitor just doesn't report.
    pub fn attach_monitor(&self, monitor: Arc<crate::monitor::Monitor>) {
        *self.monitor.lock() = Some(monitor);
    }

    pub fn register_transformer(&self, transformer: Box<dyn Transformer>) {
        self.transformers.write().register(transformer);
    }

    pub fn add_routing_rule(&self, rule: RoutingRule) {
        self.router.add_rule(rule);
    }

    pub fn remove_routing_rule(&self, name: &str) {
        self.router.remove_rule(name);
    }

    pub fn register_channel(&self, channel: Arc<dyn OutputChannel>) {
        self.router.register_channel(channel);
    }

    pub fn unregister_channel(&self, id: &ChannelId) {
        self.router.unregister_channel(id);
    }

    /// Starts the processing loop. Idempotent — a second call while
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.process_loop().await });
        *self.worker.lock() = Some(handle);
    }

    /// Stops accepting further processing iterations, drains whatever is
    /// already queued (up to `DRAIN_DEADLINE`), then releases the worker
    /// task. Idempotent. After this returns, no channel's `deliver` is
    /// invoked again (SPEC_FULL §8 property 7).
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_requested_at_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.queue_notify.notify_waiters();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Non-blocking enqueue. Drops the oldest queued event when the queue
    /// is already at `maxQueueSize` (SPEC_FULL §4, backpressure).
    pub fn submit(&self, raw: RawMarketEvent) {
        let depth = {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.max_queue_size {
                queue.pop_front();
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(QueuedEvent {
                raw,
                enqueued_at_ms: chrono::Utc::now().timestamp_millis(),
            });
            queue.len()
        };
        self.update_backpressure(depth);
        self.queue_notify.notify_one();
    }

    fn update_backpressure(&self, depth: usize) {
        let threshold = self.config.backpressure_threshold;
        let was_active = self.backpressure_active.load(Ordering::Relaxed);
        if !was_active && depth >= threshold {
            self.backpressure_active.store(true, Ordering::Relaxed);
            log::warn!("backpressure activated: queue depth {depth} >= threshold {threshold}");
        } else if was_active && (depth as f64) <= (threshold as f64) * 0.8 {
            self.backpressure_active.store(false, Ordering::Relaxed);
            log::info!("backpressure deactivated: queue depth {depth}");
        }
    }

    /// Status of every channel currently registered with this manager's
    /// router — passthrough used to build the monitor's per-tick channel
    /// health samples.
    pub fn channel_statuses(&self) -> Vec<(ChannelId, crate::channel::ChannelStatus)> {
        self.router.channel_statuses()
    }

    pub fn stats(&self) -> ManagerStats {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            0.0
        } else {
            self.latency_total_ms.load(Ordering::Relaxed) as f64 / samples as f64
        };
        ManagerStats {
            queue_depth: self.queue.lock().len(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            validation_errors: self.counters.validation_errors.load(Ordering::Relaxed),
            transform_errors: self.counters.transform_errors.load(Ordering::Relaxed),
            routing_errors: self.counters.routing_errors.load(Ordering::Relaxed),
            channel_errors: self.router.channel_error_count(),
            backpressure_active: self.backpressure_active.load(Ordering::Relaxed),
            avg_latency_ms: avg,
            p95_latency_ms: self.p95.get(),
            p99_latency_ms: self.p99.get(),
        }
    }

    /// One logical consumer: dequeues up to `batchSize` items (if batching
    /// is enabled) or one item, processes the batch concurrently, then
    /// yields for the next iteration (SPEC_FULL §4.5, §5).
    async fn process_loop(self: Arc<Self>) {
        loop {
            let batch = self.dequeue_batch();
            self.update_backpressure(self.queue.lock().len());
            if !batch.is_empty() {
                let futures = batch.into_iter().map(|event| self.process_one(event));
                join_all(futures).await;
                continue;
            }

            if !self.running.load(Ordering::Relaxed) {
                return;
            }
            self.queue_notify.notified().await;
            if !self.running.load(Ordering::Relaxed) && self.queue.lock().is_empty() {
                return;
            }
            if !self.running.load(Ordering::Relaxed) && self.drain_deadline_elapsed() {
                let remaining = self.queue.lock().len();
                if remaining > 0 {
                    log::warn!("drain deadline elapsed with {remaining} item(s) still queued; counting as dropped");
                    self.queue.lock().clear();
                    self.counters.dropped.fetch_add(remaining as u64, Ordering::Relaxed);
                }
                return;
            }
        }
    }

    fn drain_deadline_elapsed(&self) -> bool {
        let requested_at = self.stop_requested_at_ms.load(Ordering::Relaxed);
        requested_at > 0
            && chrono::Utc::now().timestamp_millis() - requested_at > DRAIN_DEADLINE.as_millis() as i64
    }

    fn dequeue_batch(&self) -> Vec<QueuedEvent> {
        let limit = if self.batching.enabled { self.batching.batch_size.max(1) } else { 1 };
        let mut queue = self.queue.lock();
        let take = limit.min(queue.len());
        queue.drain(..take).collect()
    }

    async fn process_one(&self, event: QueuedEvent) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let timeout = Duration::from_millis(self.config.processing_timeout_ms);
        if tokio::time::timeout(timeout, self.process_inner(event.raw, now_ms)).await.is_err() {
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            log::warn!("processing timed out after {}ms", self.config.processing_timeout_ms);
        }

        let latency_ms = now_ms - event.enqueued_at_ms;
        self.latency_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.p95.observe(latency_ms);
        self.p99.observe(latency_ms);

        if let Some(monitor) = self.monitor.lock().as_ref() {
            monitor.record_processed(now_ms);
        }
    }

    async fn process_inner(&self, raw: RawMarketEvent, now_ms: i64) {
        let record = match self.normalizer.normalize(&raw, now_ms) {
            Ok(record) => record,
            Err(e) => {
                self.counters.validation_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping record that failed normalization: {e}");
                return;
            }
        };

        if let Err(violations) = self.normalizer.validate(&record, now_ms) {
            self.counters.validation_errors.fetch_add(violations.len() as u64, Ordering::Relaxed);
            log::debug!("dropping record that failed validation: {} violation(s)", violations.len());
            return;
        }

        let ctx = TransformContext {
            now_ms,
            processing_version: &self.processing_version,
        };
        let (record, transform_errors) = self.transformers.read().run(record, &ctx);
        if !transform_errors.is_empty() {
            self.counters
                .transform_errors
                .fetch_add(transform_errors.len() as u64, Ordering::Relaxed);
        }

        let timeout = Duration::from_millis(self.config.processing_timeout_ms);
        let outcome: RouteOutcome = self.router.route(record, timeout).await;
        if !outcome.routing_errors.is_empty() {
            self.counters
                .routing_errors
                .fetch_add(outcome.routing_errors.len() as u64, Ordering::Relaxed);
        }
        if outcome.all_targets_failed {
            log::warn!("all {} matched channel(s) failed delivery", outcome.matched_channels);
        }
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }
}
