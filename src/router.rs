//! Message router (SPEC_FULL §4.3). Evaluates ordered routing rules against
//! a record, deduplicates fan-out by channel id, and delivers concurrently
//! to every matched channel with all-settled semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;

use crate::channel::{ChannelId, OutputChannel};
use crate::error::{ChannelDeliveryError, RoutingError};
use crate::model::MarketData;

pub type Condition = Arc<dyn Fn(&MarketData) -> bool + Send + Sync>;
pub type RuleTransform = Arc<dyn Fn(&MarketData) -> MarketData + Send + Sync>;

/// A single routing rule. See SPEC_FULL §3 ("RoutingRule").
#[derive(Clone)]
pub struct RoutingRule {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub condition: Condition,
    pub target_channels: Vec<ChannelId>,
    pub transform: Option<RuleTransform>,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, priority: i32, condition: Condition, targets: Vec<ChannelId>) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            condition,
            target_channels: targets,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: RuleTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Outcome of one `route` call, reported back to the manager for stats.
#[derive(Debug, Default)]
pub struct RouteOutcome {
    pub matched_channels: usize,
    pub delivered: usize,
    pub channel_errors: Vec<ChannelDeliveryError>,
    pub routing_errors: Vec<RoutingError>,
    /// `true` when at least one channel was targeted but every single one
    /// failed (SPEC_FULL §4.3 step 4: "propagate only if all targets
    /// fail").
    pub all_targets_failed: bool,
}

#[derive(Default)]
struct RouterCounters {
    routed: AtomicU64,
    routing_errors: AtomicU64,
    channel_errors: AtomicU64,
    no_match: AtomicU64,
}

/// Holds rules in priority-descending order and a registry of channels to
/// deliver to. Both are behind a reader-preferring lock: `route()` takes a
/// read snapshot, mutation briefly takes the write lock (SPEC_FULL §5).
pub struct Router {
    rules: RwLock<Vec<RoutingRule>>,
    channels: RwLock<HashMap<ChannelId, Arc<dyn OutputChannel>>>,
    counters: RouterCounters,
}

impl Router {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            channels: RwLock::new(HashMap::new()),
            counters: RouterCounters::default(),
        }
    }

    pub fn add_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove_rule(&self, name: &str) {
        self.rules.write().retain(|r| r.name != name);
    }

    pub fn register_channel(&self, channel: Arc<dyn OutputChannel>) {
        self.channels.write().insert(channel.id().to_string(), channel);
    }

    pub fn unregister_channel(&self, id: &str) -> Option<Arc<dyn OutputChannel>> {
        self.channels.write().remove(id)
    }

    /// A status snapshot of every registered channel, keyed by id — the
    /// monitor folds these into its per-channel health alerts (SPEC_FULL
    /// §4.6).
    pub fn channel_statuses(&self) -> Vec<(ChannelId, crate::channel::ChannelStatus)> {
        self.channels
            .read()
            .values()
            .map(|c| (c.id().to_string(), c.status()))
            .collect()
    }

    pub fn routed_count(&self) -> u64 {
        self.counters.routed.load(Ordering::Relaxed)
    }

    /// Total channel delivery failures (including timeouts) across every
    /// `route` call, used by the monitor's `channel_errors` alert threshold.
    pub fn channel_error_count(&self) -> u64 {
        self.counters.channel_errors.load(Ordering::Relaxed)
    }

    pub fn routing_error_count(&self) -> u64 {
        self.counters.routing_errors.load(Ordering::Relaxed)
    }

    /// Evaluates all enabled rules against `record`, dedupes by channel id
    /// (highest-priority rule's transform wins, per SPEC_FULL §9 Open
    /// Question 2), and delivers concurrently. Each channel's `deliver` is
    /// bounded by `delivery_timeout`; a channel that doesn't finish in time
    /// is counted as a transient [`ChannelDeliveryError`] (SPEC_FULL §5/§7).
    pub async fn route(&self, record: MarketData, delivery_timeout: Duration) -> RouteOutcome {
        // Step 1 + 2: snapshot rules under the read lock, release it before
        // any awaiting happens.
        let (plan, routing_errors): (Vec<(ChannelId, MarketData)>, Vec<RoutingError>) = {
            let rules = self.rules.read();
            let mut seen: HashMap<ChannelId, MarketData> = HashMap::new();
            let mut routing_errors_tmp = Vec::new();

            for rule in rules.iter().filter(|r| r.enabled) {
                let matched = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (rule.condition)(&record)));
                let matched = match matched {
                    Ok(m) => m,
                    Err(_) => {
                        routing_errors_tmp.push(RoutingError {
                            rule: rule.name.clone(),
                            cause: "condition evaluator panicked".to_string(),
                        });
                        continue;
                    }
                };
                if !matched {
                    continue;
                }

                let effective = match &rule.transform {
                    Some(t) => t(&record),
                    None => record.clone(),
                };

                for channel_id in &rule.target_channels {
                    // Highest priority first (rules are pre-sorted); keep
                    // the first rule's transform for each channel.
                    seen.entry(channel_id.clone()).or_insert_with(|| effective.clone());
                }
            }

            if !routing_errors_tmp.is_empty() {
                self.counters
                    .routing_errors
                    .fetch_add(routing_errors_tmp.len() as u64, Ordering::Relaxed);
            }

            let mut plan: Vec<(ChannelId, MarketData)> = seen.into_iter().collect();
            plan.sort_by(|a, b| a.0.cmp(&b.0));
            if plan.is_empty() {
                log::debug!("route: no rule matched record ({}/{})", record.exchange, record.symbol);
                self.counters.no_match.fetch_add(1, Ordering::Relaxed);
            }
            (plan, routing_errors_tmp)
        };

        if plan.is_empty() {
            return RouteOutcome {
                routing_errors,
                ..RouteOutcome::default()
            };
        }

        let channels = self.channels.read();
        let mut futures = Vec::with_capacity(plan.len());
        for (channel_id, effective_record) in &plan {
            let Some(channel) = channels.get(channel_id).cloned() else {
                continue;
            };
            let record = effective_record.clone();
            let channel_id = channel_id.clone();
            futures.push(async move {
                match tokio::time::timeout(delivery_timeout, channel.deliver(record)).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelDeliveryError::timeout(channel_id, delivery_timeout.as_millis() as u64)),
                }
            });
        }
        let matched_channels = futures.len();
        drop(channels);

        let results = join_all(futures).await;
        let mut delivered = 0usize;
        let mut channel_errors = Vec::new();
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => channel_errors.push(e),
            }
        }

        if !channel_errors.is_empty() {
            self.counters
                .channel_errors
                .fetch_add(channel_errors.len() as u64, Ordering::Relaxed);
            for e in &channel_errors {
                log::warn!("channel delivery error: {e}");
            }
        }
        self.counters.routed.fetch_add(delivered as u64, Ordering::Relaxed);

        RouteOutcome {
            matched_channels,
            delivered,
            all_targets_failed: matched_channels > 0 && delivered == 0,
            channel_errors,
            routing_errors,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
