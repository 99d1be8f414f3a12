//! Configuration surface consumed by the core (SPEC_FULL §6).
//!
//! Mirrors the reference codebase's `Config`/`ExchangeConfig` shape: a
//! plain `serde`-deserialized struct loaded from a JSON file on disk, with
//! `#[serde(default = "...")]` functions supplying the documented defaults.
//! No environment-variable layering, no secret manager — that glue is out
//! of scope (SPEC_FULL §1).

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingress: IngressConfig::default(),
            batching: BatchingConfig::default(),
            monitoring: MonitoringConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            backpressure_threshold: default_backpressure_threshold(),
            processing_timeout_ms: default_processing_timeout_ms(),
        }
    }
}

fn default_max_queue_size() -> usize {
    10_000
}
fn default_backpressure_threshold() -> usize {
    8_000
}
fn default_processing_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            batch_size: default_batch_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_batch_size() -> usize {
    20
}
fn default_flush_timeout_ms() -> u64 {
    1_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_true")]
    pub enable_latency_tracking: bool,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: default_metrics_interval_ms(),
            enable_latency_tracking: true,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

fn default_metrics_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_queue_size_threshold")]
    pub queue_size: usize,
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_ms: u64,
    #[serde(default = "default_channel_errors")]
    pub channel_errors: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: default_error_rate(),
            queue_size: default_queue_size_threshold(),
            latency_ms: default_latency_threshold_ms(),
            channel_errors: default_channel_errors(),
        }
    }
}

fn default_error_rate() -> f64 {
    0.05
}
fn default_queue_size_threshold() -> usize {
    8_000
}
fn default_latency_threshold_ms() -> u64 {
    1_000
}
fn default_channel_errors() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_connections: default_max_connections(),
            send_buffer_size: default_send_buffer_size(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_connection_timeout_ms() -> u64 {
    60_000
}
fn default_max_connections() -> usize {
    1_000
}
fn default_send_buffer_size() -> usize {
    256
}
fn default_bind_addr() -> String {
    "0.0.0.0:8900".to_string()
}

/// Loads a [`Config`] from a JSON file on disk.
///
/// Mirrors the reference codebase's `load_config` helper. Any I/O or
/// parse failure is an `anyhow` error — this is a boundary crossing
/// (SPEC_FULL §1), not a pipeline error.
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = std::fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
