//! Runtime monitoring (SPEC_FULL §5): rolling throughput, latency, and
//! error-rate aggregation, plus threshold-driven alerting. Replaces the
//! reference codebase's `once_cell::Lazy<RuntimeMetrics>` global singleton
//! with a constructor-injected collaborator — callers hold an
//! `Arc<Monitor>` instead of reaching into a process-wide static, which is
//! what makes the manager/router/channels independently testable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::manager::ManagerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub component: String,
    pub message: String,
    pub created_at_ms: i64,
    pub resolved: bool,
}

/// How long an alert stays active once its condition stops firing, before
/// `sweep_resolved` auto-resolves it (SPEC_FULL §5 "alerts auto-resolve").
const ALERT_COOLDOWN_MS: i64 = 60_000;

struct ActiveAlert {
    alert: Alert,
    last_fired_ms: i64,
}

/// A fixed-capacity ring used for both the throughput window and the
/// latency history — the same "bounded memory, not unbounded history"
/// constraint the manager's `RunningQuantile` follows.
struct Ring {
    samples: VecDeque<(i64, f64)>,
    window_ms: i64,
}

impl Ring {
    fn new(window_ms: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms,
        }
    }

    fn push(&mut self, now_ms: i64, value: f64) {
        self.samples.push_back((now_ms, value));
        while let Some((t, _)) = self.samples.front() {
            if now_ms - t > self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(&self) -> f64 {
        self.samples.iter().map(|(_, v)| v).sum()
    }
}

pub struct ChannelHealthSample {
    pub channel_id: String,
    pub healthy: bool,
}

pub struct Monitor {
    throughput_window: Mutex<Ring>,
    alerts: Mutex<Vec<ActiveAlert>>,
    thresholds: crate::config::AlertThresholds,
    alerts_raised: AtomicU64,
}

impl Monitor {
    pub fn new(thresholds: crate::config::AlertThresholds) -> Arc<Self> {
        Arc::new(Self {
            throughput_window: Mutex::new(Ring::new(30_000)),
            alerts: Mutex::new(Vec::new()),
            thresholds,
            alerts_raised: AtomicU64::new(0),
        })
    }

    /// Records that one record was processed at `now_ms` — feeds the
    /// rolling 30s throughput window.
    pub fn record_processed(&self, now_ms: i64) {
        self.throughput_window.lock().push(now_ms, 1.0);
    }

    pub fn throughput_per_sec(&self, now_ms: i64) -> f64 {
        let mut window = self.throughput_window.lock();
        window.push(now_ms, 0.0); // prune without adding a sample
        window.sum() / 30.0
    }

    /// Evaluates manager stats against the configured thresholds and raises
    /// or resolves alerts accordingly. Call this once per monitoring tick.
    pub fn evaluate(&self, now_ms: i64, stats: &ManagerStats, channel_health: &[ChannelHealthSample]) {
        let error_rate = if stats.processed == 0 {
            0.0
        } else {
            (stats.validation_errors + stats.transform_errors + stats.routing_errors) as f64 / stats.processed as f64
        };
        let error_rate_severity = if error_rate > self.thresholds.error_rate * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        self.fire_or_clear(now_ms, "error_rate", error_rate > self.thresholds.error_rate, error_rate_severity, || {
            format!("error rate {:.2}% exceeds threshold {:.2}%", error_rate * 100.0, self.thresholds.error_rate * 100.0)
        });

        self.fire_or_clear(now_ms, "queue_depth", stats.queue_depth >= self.thresholds.queue_size, Severity::Warning, || {
            format!("queue depth {} >= threshold {}", stats.queue_depth, self.thresholds.queue_size)
        });

        self.fire_or_clear(
            now_ms,
            "latency",
            stats.p99_latency_ms >= self.thresholds.latency_ms as i64,
            Severity::Warning,
            || format!("p99 latency {}ms >= threshold {}ms", stats.p99_latency_ms, self.thresholds.latency_ms),
        );

        let channel_errors_severity = if stats.channel_errors >= self.thresholds.channel_errors * 2 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        self.fire_or_clear(
            now_ms,
            "channel_errors",
            stats.channel_errors >= self.thresholds.channel_errors,
            channel_errors_severity,
            || format!("channel error count {} >= threshold {}", stats.channel_errors, self.thresholds.channel_errors),
        );

        for sample in channel_health {
            self.fire_or_clear(
                now_ms,
                &format!("channel:{}", sample.channel_id),
                !sample.healthy,
                Severity::Critical,
                || format!("channel `{}` is unhealthy", sample.channel_id),
            );
        }

        self.sweep_resolved(now_ms);
    }

    fn fire_or_clear(&self, now_ms: i64, component: &str, condition: bool, severity: Severity, message: impl Fn() -> String) {
        let mut alerts = self.alerts.lock();
        let existing = alerts.iter_mut().find(|a| a.alert.component == component && !a.alert.resolved);

        if condition {
            match existing {
                Some(active) => {
                    active.last_fired_ms = now_ms;
                    active.alert.severity = severity;
                }
                None => {
                    let alert = Alert {
                        id: Uuid::new_v4(),
                        severity,
                        component: component.to_string(),
                        message: message(),
                        created_at_ms: now_ms,
                        resolved: false,
                    };
                    log::warn!("alert raised: {} — {}", alert.component, alert.message);
                    self.alerts_raised.fetch_add(1, Ordering::Relaxed);
                    alerts.push(ActiveAlert {
                        alert,
                        last_fired_ms: now_ms,
                    });
                }
            }
        }
    }

    fn sweep_resolved(&self, now_ms: i64) {
        for active in self.alerts.lock().iter_mut() {
            if !active.alert.resolved && now_ms - active.last_fired_ms > ALERT_COOLDOWN_MS {
                active.alert.resolved = true;
                log::info!("alert auto-resolved: {}", active.alert.component);
            }
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().iter().filter(|a| !a.alert.resolved).map(|a| a.alert.clone()).collect()
    }

    pub fn alerts_raised_total(&self) -> u64 {
        self.alerts_raised.load(Ordering::Relaxed)
    }

    /// A single 0–100 composite score blending throughput, p95 latency,
    /// queue utilization, and success rate, each clamped and weighted
    /// (SPEC_FULL §5 "performance score"). Not a precise SLO metric — a
    /// glanceable dashboard number. `expected_throughput_per_sec` is the
    /// operator's notion of "fully loaded" for this deployment, used only
    /// to normalize the throughput factor into 0–100.
    pub fn performance_score(&self, now_ms: i64, stats: &ManagerStats, expected_throughput_per_sec: f64) -> f64 {
        let error_rate = if stats.processed == 0 {
            0.0
        } else {
            (stats.validation_errors + stats.transform_errors + stats.routing_errors) as f64 / stats.processed as f64
        };
        let success_score = (1.0 - (error_rate / self.thresholds.error_rate.max(0.0001)).min(1.0)) * 100.0;
        let latency_score = (1.0 - (stats.p95_latency_ms as f64 / self.thresholds.latency_ms.max(1) as f64).min(1.0)) * 100.0;
        let queue_score = (1.0 - (stats.queue_depth as f64 / self.thresholds.queue_size.max(1) as f64).min(1.0)) * 100.0;
        let throughput_score = (self.throughput_per_sec(now_ms) / expected_throughput_per_sec.max(0.0001)).min(1.0) * 100.0;

        (throughput_score * 0.25 + latency_score * 0.25 + queue_score * 0.2 + success_score * 0.3).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertThresholds;

    fn stats(processed: u64, errors: u64, queue_depth: usize, p99: i64) -> ManagerStats {
        ManagerStats {
            queue_depth,
            processed,
            dropped: 0,
            timeouts: 0,
            validation_errors: errors,
            transform_errors: 0,
            routing_errors: 0,
            channel_errors: 0,
            backpressure_active: false,
            avg_latency_ms: 0.0,
            p95_latency_ms: p99,
            p99_latency_ms: p99,
        }
    }

    #[test]
    fn raises_an_alert_once_error_rate_exceeds_threshold() {
        let monitor = Monitor::new(AlertThresholds {
            error_rate: 0.05,
            queue_size: 1_000_000,
            latency_ms: 1_000_000,
            channel_errors: 1_000_000,
        });
        monitor.evaluate(1_000, &stats(100, 10, 0, 0), &[]);
        assert_eq!(monitor.active_alerts().len(), 1);
        assert_eq!(monitor.active_alerts()[0].component, "error_rate");
    }

    #[test]
    fn raises_an_alert_once_channel_error_count_meets_threshold() {
        let monitor = Monitor::new(AlertThresholds {
            error_rate: 1.0,
            queue_size: 1_000_000,
            latency_ms: 1_000_000,
            channel_errors: 5,
        });
        let mut stats = stats(100, 0, 0, 0);
        stats.channel_errors = 5;
        monitor.evaluate(1_000, &stats, &[]);
        assert!(monitor.active_alerts().iter().any(|a| a.component == "channel_errors"));
    }

    #[test]
    fn alert_auto_resolves_after_cooldown_without_recurrence() {
        let monitor = Monitor::new(AlertThresholds {
            error_rate: 0.05,
            queue_size: 1_000_000,
            latency_ms: 1_000_000,
            channel_errors: 1_000_000,
        });
        monitor.evaluate(0, &stats(100, 10, 0, 0), &[]);
        assert_eq!(monitor.active_alerts().len(), 1);

        monitor.evaluate(ALERT_COOLDOWN_MS + 1, &stats(100, 0, 0, 0), &[]);
        assert!(monitor.active_alerts().is_empty());
    }

    #[test]
    fn error_rate_alert_escalates_to_critical_well_past_threshold() {
        let monitor = Monitor::new(AlertThresholds {
            error_rate: 0.05,
            queue_size: 1_000_000,
            latency_ms: 1_000_000,
            channel_errors: 1_000_000,
        });
        monitor.evaluate(1_000, &stats(100, 50, 0, 0), &[]);
        let alert = monitor.active_alerts().into_iter().find(|a| a.component == "error_rate").unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn unhealthy_channel_alert_is_always_critical() {
        let monitor = Monitor::new(AlertThresholds::default());
        let sample = ChannelHealthSample {
            channel_id: "slow".to_string(),
            healthy: false,
        };
        monitor.evaluate(1_000, &stats(100, 0, 0, 0), &[sample]);
        let alert = monitor.active_alerts().into_iter().find(|a| a.component == "channel:slow").unwrap();
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn performance_score_is_perfect_when_everything_is_under_threshold() {
        let monitor = Monitor::new(AlertThresholds::default());
        monitor.record_processed(1_000);
        assert_eq!(monitor.performance_score(1_000, &stats(1000, 0, 0, 0), 0.001), 100.0);
    }

    #[test]
    fn performance_score_drops_as_throughput_falls_short_of_expectation() {
        let monitor = Monitor::new(AlertThresholds::default());
        monitor.record_processed(1_000);
        let full = monitor.performance_score(1_000, &stats(1000, 0, 0, 0), 0.001);
        let starved = monitor.performance_score(1_000, &stats(1000, 0, 0, 0), 1_000_000.0);
        assert!(starved < full, "starved score {starved} should be below full score {full}");
    }
}
