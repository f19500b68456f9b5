// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use sports_data_pipeline::{
    collector::DataSource,
    config::{Config, PersistenceBackend, pipeline_config},
    pipeline::Orchestrator,
    sinks::{AlertSink, FanoutAlertSink, LogAlertSink, MemoryStore, PersistenceSink, RedisStore, WsAlertSink},
    sources::get_source,
};

use anyhow::{Context, anyhow};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Runtime for the sports data collection pipeline.
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration
// - Build the persistence and alert sinks
// - Start enabled source collectors through the orchestrator
// - Report metrics periodically
// - Shut down cleanly on Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, exactly once and as early as possible.
    // Both reqwest and tokio-tungstenite use it.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - First CLI argument, `config.json` otherwise.
    // - The file may contain API keys and the alert key; it
    //   must not be committed to version control.
    // --------------------------------------------------------
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load(&path)?;

    let level = if config.debug_log() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    info!("Loaded configuration from {}", path);

    // --------------------------------------------------------
    // Persistence backend
    // --------------------------------------------------------
    let sink: Arc<dyn PersistenceSink> = match config.persistence.backend {
        PersistenceBackend::Memory => {
            warn!("Using in-memory persistence; records are lost on exit");
            Arc::new(MemoryStore::new())
        }
        PersistenceBackend::Redis => {
            let url = config
                .persistence
                .redis_url
                .as_deref()
                .context("redis_url is required for the redis backend")?;
            Arc::new(RedisStore::connect(url, &config.persistence.key_prefix).await?)
        }
    };

    // --------------------------------------------------------
    // Alert sinks
    //
    // Alerts always go to the log; the WebSocket forwarder is
    // added when configured (reconnects on its own, optional
    // demo mode).
    // --------------------------------------------------------
    let mut alert_sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
    if let Some(alerting) = &config.alerting {
        alert_sinks.push(Arc::new(WsAlertSink::new(
            &alerting.url,
            &alerting.key,
            alerting.connections,
            config.debug_log(),
            alerting.demo.unwrap_or(false),
        )));
    }
    let alerts = Arc::new(FanoutAlertSink::new(alert_sinks));

    // --------------------------------------------------------
    // Sources
    // --------------------------------------------------------
    let client = reqwest::Client::builder()
        .user_agent(concat!("sports-data-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut sources: Vec<Arc<dyn DataSource>> = Vec::new();
    for source_cfg in config.sources.iter().filter(|s| s.enabled) {
        let Some(source) = get_source(source_cfg, client.clone()) else {
            error!("Source '{}' is not supported", source_cfg.name);
            continue;
        };
        info!("Registering {} source", source_cfg.name);
        sources.push(source);
    }

    let pipeline_cfg = pipeline_config(&config);
    let metrics_every = pipeline_cfg.metrics_interval;

    let orchestrator = Arc::new(Orchestrator::new(sources, sink, alerts, pipeline_cfg));
    orchestrator.start_all(None).await?;

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = interval(metrics_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                info!("{}", orchestrator.get_metrics(24).await.log_line());
            }
        })
    };

    // --------------------------------------------------------
    // Run until Ctrl-C, then drain in-flight cycles
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    reporter.abort();
    orchestrator.stop_all().await;

    let status = orchestrator.get_status();
    info!("Final status: {}", serde_json::to_string(&status)?);

    Ok(())
}
