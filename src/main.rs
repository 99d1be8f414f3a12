// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Wires together the pieces declared in `lib.rs`:
// - config:    on-disk JSON configuration
// - manager:   ingress queue, backpressure, transform + route loop
// - monitor:   alerting and the performance score
// - proxy:     WebSocket subscriber fan-out
// - demo:      a synthetic source, standing in for a real exchange feed
//
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::{ring, CryptoProvider};

use dataflow_engine::channel::{CacheChannel, InMemoryCacheStore, InProcessBroker, PubSubChannel, WebSocketOutputChannel};
use dataflow_engine::config::{load_config, Config};
use dataflow_engine::demo::SyntheticSource;
use dataflow_engine::ingress::run_source;
use dataflow_engine::manager::DataFlowManager;
use dataflow_engine::monitor::{ChannelHealthSample, Monitor};
use dataflow_engine::proxy::WebSocketProxy;
use dataflow_engine::router::RoutingRule;
use dataflow_engine::transform::{DepthCompressionTransformer, EnrichmentTransformer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. Must run exactly once, as early as possible.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    // --------------------------------------------------------
    // Load configuration. Falls back to documented defaults when
    // no file is present, so the binary runs standalone out of
    // the box for demos.
    // --------------------------------------------------------
    let config: Config = load_config("config.json").unwrap_or_else(|e| {
        log::warn!("could not load config.json ({e}), falling back to defaults");
        Config::default()
    });

    let router = Arc::new(dataflow_engine::router::Router::new());

    let broker = InProcessBroker::new();
    router.register_channel(Arc::new(PubSubChannel::new("pubsub-main", "md", broker.clone())));
    router.register_channel(Arc::new(CacheChannel::new("cache-main", InMemoryCacheStore::new())));

    let proxy = WebSocketProxy::new(
        config.proxy.max_connections,
        config.proxy.send_buffer_size,
        Duration::from_millis(config.proxy.heartbeat_interval_ms),
        Duration::from_millis(config.proxy.connection_timeout_ms),
    );
    router.register_channel(Arc::new(WebSocketOutputChannel::new("ws-main", proxy.clone())));

    router.add_rule(RoutingRule::new(
        "broadcast-all",
        0,
        Arc::new(|_| true),
        vec!["pubsub-main".to_string(), "cache-main".to_string(), "ws-main".to_string()],
    ));

    let manager = DataFlowManager::with_batching(config.ingress.clone(), config.batching.clone(), router);
    manager.register_transformer(Box::new(EnrichmentTransformer::new("dataflow-engine")));
    manager.register_transformer(Box::new(DepthCompressionTransformer::default()));
    manager.start();

    let monitor = Monitor::new(config.monitoring.alert_thresholds.clone());
    manager.attach_monitor(monitor.clone());
    {
        let manager = manager.clone();
        let monitor = monitor.clone();
        let interval_ms = config.monitoring.metrics_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                let stats = manager.stats();
                let channel_health: Vec<ChannelHealthSample> = manager
                    .channel_statuses()
                    .into_iter()
                    .map(|(id, status)| ChannelHealthSample {
                        channel_id: id,
                        healthy: status.health == dataflow_engine::channel::Health::Healthy,
                    })
                    .collect();
                monitor.evaluate(now_ms, &stats, &channel_health);
                // 1000 msg/s is a placeholder "fully loaded" baseline for the
                // demo binary; a real deployment would size this to its own
                // peak ingest capacity.
                let score = monitor.performance_score(now_ms, &stats, 1000.0);
                log::info!(
                    "queue_depth={} processed={} dropped={} p99_ms={} score={:.1}",
                    stats.queue_depth,
                    stats.processed,
                    stats.dropped,
                    stats.p99_latency_ms,
                    score,
                );
            }
        });
    }

    {
        let proxy = proxy.clone();
        let bind_addr = config.proxy.bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.listen(&bind_addr).await {
                log::error!("websocket proxy stopped: {e}");
            }
        });
    }

    tokio::spawn(run_source(SyntheticSource::new(Duration::from_millis(50)), manager.clone()));

    // --------------------------------------------------------
    // Keep the process alive forever. All work runs in spawned
    // tasks; this future never resolves.
    // --------------------------------------------------------
    futures_util::future::pending::<()>().await;

    Ok(())
}
