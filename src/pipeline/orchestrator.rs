use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    collector::{Collector, CollectorState, CollectorStatus, DataSource, StatusHandle},
    config::PipelineConfig,
    error::PipelineError,
    metrics::{CollectorMetrics, MetricsReport, RuntimeMetrics},
    sinks::{Alert, AlertKind, AlertSink, PersistenceSink, Severity},
};

use super::monitor::{HealthMonitor, deliver};

/// Top-level lifecycle state.
///
/// Individual collector failures never move the pipeline out of
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot returned by `get_status()`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub collectors: Vec<CollectorStatus>,
}

impl PipelineStatus {
    pub fn collector(&self, name: &str) -> Option<&CollectorStatus> {
        self.collectors.iter().find(|c| c.name == name)
    }
}

struct MonitorTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns every collector as a unit.
///
/// Responsibilities:
/// - Register the known sources as collectors on first start
/// - Start / stop them together (best-effort start)
/// - Run the health monitor on its own cadence
/// - Restart single collectors on operator request
/// - Expose status and metrics snapshots
///
/// Constructed explicitly by the entry point and shared by
/// reference; there is no process-wide instance.
pub struct Orchestrator {
    sources: Vec<Arc<dyn DataSource>>,
    sink: Arc<dyn PersistenceSink>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<RuntimeMetrics>,

    config: Mutex<PipelineConfig>,
    collectors: RwLock<Vec<Arc<Collector>>>,
    state: Mutex<PipelineState>,

    /// Serializes start_all / stop_all / restart_collector
    lifecycle: tokio::sync::Mutex<Option<MonitorTask>>,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<dyn DataSource>>,
        sink: Arc<dyn PersistenceSink>,
        alerts: Arc<dyn AlertSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sources,
            sink,
            alerts,
            metrics: Arc::new(RuntimeMetrics::default()),
            config: Mutex::new(config),
            collectors: RwLock::new(Vec::new()),
            state: Mutex::new(PipelineState::Stopped),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state_guard()
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn state_guard(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: PipelineState) {
        *self.state_guard() = state;
        info!("Pipeline {:?}", state);
    }

    fn registered(&self) -> Vec<Arc<Collector>> {
        self.collectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn find(&self, name: &str) -> Option<Arc<Collector>> {
        self.registered().into_iter().find(|c| c.name() == name)
    }

    /// Creates collectors for sources not registered yet.
    fn register(&self, config: &PipelineConfig) {
        let mut collectors = self.collectors.write().unwrap_or_else(|e| e.into_inner());
        for source in &self.sources {
            if collectors.iter().any(|c| c.name() == source.name()) {
                continue;
            }
            collectors.push(Arc::new(Collector::new(
                source.clone(),
                self.sink.clone(),
                self.metrics.clone(),
                config.fetch_timeout,
            )));
            info!("Registered collector {}", source.name());
        }
    }

    /// Starts every collector, then the monitor.
    ///
    /// Startup is best-effort: a collector that fails to start is
    /// marked `Errored`, alerted, and skipped. An invalid config is
    /// rejected before anything starts and the pipeline stays `Stopped`.
    pub async fn start_all(&self, config: Option<PipelineConfig>) -> Result<(), PipelineError> {
        let mut lifecycle = self.lifecycle.lock().await;

        if matches!(self.state(), PipelineState::Running | PipelineState::Starting) {
            return Err(PipelineError::AlreadyRunning);
        }

        let config = config.unwrap_or_else(|| self.config());
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;

        self.set_state(PipelineState::Starting);
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        self.register(&config);

        let collectors = self.registered();
        for collector in &collectors {
            let interval = config.interval_for(collector.name(), collector.default_interval());

            if let Err(e) = collector.start(interval) {
                error!("[{}] failed to start: {}", collector.name(), e);
                collector.status().update(|s| {
                    s.state = CollectorState::Errored;
                    s.push_error(Utc::now(), e.to_string());
                });

                let alert = Alert::new(
                    AlertKind::CollectorStartFailure,
                    Severity::Medium,
                    format!("Collector {} failed to start", collector.name()),
                    e.to_string(),
                    json!({ "collector": collector.name() }),
                );
                deliver(self.alerts.as_ref(), &self.metrics, alert).await;
            }
        }

        let monitor = HealthMonitor::new(
            self.alerts.clone(),
            self.sink.clone(),
            self.metrics.clone(),
            config.clone(),
        );
        let statuses: Vec<StatusHandle> = collectors.iter().map(|c| c.status().clone()).collect();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(
            monitor,
            statuses,
            config.monitor_interval,
            stop_rx,
        ));
        *lifecycle = Some(MonitorTask { stop_tx, handle });

        self.set_state(PipelineState::Running);
        Ok(())
    }

    /// Stops every collector and the monitor. No-op when stopped.
    ///
    /// Returns once in-flight cycles have finished.
    pub async fn stop_all(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.state_guard();
            if *state == PipelineState::Stopped {
                info!("Pipeline already stopped");
                return;
            }
            *state = PipelineState::Stopping;
        }
        info!("Pipeline Stopping");

        let collectors = self.registered();

        // Signal everyone first so the drains overlap
        for collector in &collectors {
            collector.stop();
        }
        let monitor = lifecycle.take();
        if let Some(monitor) = &monitor {
            let _ = monitor.stop_tx.send(true);
        }

        for collector in &collectors {
            collector.stop_and_wait().await;
        }
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.handle.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }

        self.set_state(PipelineState::Stopped);
    }

    /// Stops and restarts one collector with its configured interval.
    ///
    /// Counters and the error log of that collector are cleared;
    /// siblings are not touched. Only allowed while the pipeline is
    /// `Running`, so `stop_all` always owns every live collector.
    pub async fn restart_collector(&self, name: &str) -> Result<(), PipelineError> {
        let _lifecycle = self.lifecycle.lock().await;

        let collector = self
            .find(name)
            .ok_or_else(|| PipelineError::UnknownCollector(name.to_string()))?;
        if self.state() != PipelineState::Running {
            return Err(PipelineError::NotRunning);
        }

        info!("[{}] restart requested", name);
        if let Err(e) = collector.restart().await {
            error!("[{}] restart failed: {}", name, e);
            collector.status().update(|s| {
                s.state = CollectorState::Errored;
                s.push_error(Utc::now(), e.to_string());
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Copy of every collector status plus the pipeline state.
    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state(),
            collectors: self
                .registered()
                .iter()
                .map(|c| c.status().snapshot())
                .collect(),
        }
    }

    /// Aggregated counters plus the persisted volume of the last
    /// `window_hours`.
    pub async fn get_metrics(&self, window_hours: u64) -> MetricsReport {
        let window = Duration::from_secs(window_hours.saturating_mul(3600));
        let records_in_window = match self.sink.count_recent_by_window(window).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("Metrics: persistence count failed: {}", e);
                None
            }
        };

        let status = self.get_status();
        let count = |state: CollectorState| {
            status.collectors.iter().filter(|c| c.state == state).count()
        };

        MetricsReport {
            window_hours,
            records_in_window,
            collectors_running: count(CollectorState::Running),
            collectors_errored: count(CollectorState::Errored),
            collectors_stopped: count(CollectorState::Stopped),
            counters: self.metrics.snapshot(),
            collectors: status
                .collectors
                .iter()
                .map(|c| CollectorMetrics {
                    name: c.name.clone(),
                    records_processed: c.records_processed,
                    cycles_completed: c.cycles_completed,
                    recent_errors: c.recent_errors.len(),
                })
                .collect(),
        }
    }
}

/// Monitor cadence loop.
///
/// The first tick fires one interval after start, giving collectors
/// a full window to produce their first records.
async fn monitor_loop(
    mut monitor: HealthMonitor,
    statuses: Vec<StatusHandle>,
    every: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break,

            _ = ticker.tick() => {
                let report = monitor.tick(Utc::now(), &statuses, true).await;
                if !report.stale.is_empty() {
                    warn!("Stale collectors: {}", report.stale.join(", "));
                }
            }
        }
    }
    info!("Monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FetchTarget;
    use crate::error::NormalizeError;
    use crate::schema::NormalizedRecord;
    use crate::sinks::{MemoryAlertSink, MemoryStore};
    use chrono::DateTime;
    use serde_json::Value;

    /// Source whose cycle always succeeds with nothing.
    struct Idle(&'static str);

    #[async_trait::async_trait]
    impl DataSource for Idle {
        fn name(&self) -> &'static str {
            self.0
        }

        fn default_interval(&self) -> Duration {
            Duration::from_secs(300)
        }

        fn targets(&self) -> Vec<FetchTarget> {
            vec![]
        }

        async fn fetch(&self, _target: &FetchTarget) -> anyhow::Result<Vec<Value>> {
            Ok(vec![])
        }

        fn normalize(
            &self,
            _target: &FetchTarget,
            _raw: &Value,
            _observed_at: DateTime<Utc>,
        ) -> Result<Vec<NormalizedRecord>, NormalizeError> {
            Ok(vec![])
        }
    }

    fn idle(names: &[&'static str]) -> Vec<Arc<dyn DataSource>> {
        names
            .iter()
            .map(|&name| Arc::new(Idle(name)) as Arc<dyn DataSource>)
            .collect()
    }

    fn orchestrator(names: &[&'static str], alerts: Arc<MemoryAlertSink>) -> Orchestrator {
        Orchestrator::new(
            idle(names),
            Arc::new(MemoryStore::new()),
            alerts,
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));

        o.start_all(None).await.unwrap();
        assert!(matches!(o.start_all(None).await, Err(PipelineError::AlreadyRunning)));

        o.stop_all().await;
        assert_eq!(o.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));
        o.stop_all().await;
        assert_eq!(o.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_best_effort() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let o = orchestrator(&["a", "b"], alerts.clone());

        let config = PipelineConfig::default().with_interval("a", Duration::ZERO);
        o.start_all(Some(config)).await.unwrap();

        let status = o.get_status();
        assert_eq!(status.state, PipelineState::Running);
        assert_eq!(status.collector("a").unwrap().state, CollectorState::Errored);
        assert_eq!(status.collector("b").unwrap().state, CollectorState::Running);
        assert_eq!(alerts.count_of(AlertKind::CollectorStartFailure), 1);

        o.stop_all().await;
        let status = o.get_status();
        assert!(status.collectors.iter().all(|c| c.state == CollectorState::Stopped
            || c.state == CollectorState::Errored));
    }

    #[tokio::test]
    async fn test_restart_unknown_collector() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));
        o.start_all(None).await.unwrap();

        assert!(matches!(
            o.restart_collector("nope").await,
            Err(PipelineError::UnknownCollector(name)) if name == "nope"
        ));
        o.stop_all().await;
    }

    #[tokio::test]
    async fn test_restart_rejected_once_stopped() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));
        o.start_all(None).await.unwrap();
        o.stop_all().await;

        assert!(matches!(
            o.restart_collector("a").await,
            Err(PipelineError::NotRunning)
        ));

        let status = o.get_status();
        assert_eq!(status.state, PipelineState::Stopped);
        assert_eq!(status.collector("a").unwrap().state, CollectorState::Stopped);
        assert!(o.registered().iter().all(|c| !c.is_running()));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_start() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));

        let zero_monitor = PipelineConfig {
            monitor_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            o.start_all(Some(zero_monitor)).await,
            Err(PipelineError::InvalidConfig(_))
        ));

        let nan_multiplier = PipelineConfig {
            staleness_multiplier: f64::NAN,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            o.start_all(Some(nan_multiplier)).await,
            Err(PipelineError::InvalidConfig(_))
        ));

        assert_eq!(o.state(), PipelineState::Stopped);
        assert!(o.get_status().collectors.is_empty());

        // The stored config was left untouched
        o.start_all(None).await.unwrap();
        assert_eq!(o.config().monitor_interval, PipelineConfig::default().monitor_interval);
        o.stop_all().await;
    }

    #[tokio::test]
    async fn test_huge_metrics_window_counts_everything() {
        let o = orchestrator(&["a"], Arc::new(MemoryAlertSink::new()));
        let report = o.get_metrics(1_000_000_000_000).await;
        assert_eq!(report.records_in_window, Some(0));
    }

    #[tokio::test]
    async fn test_interval_override_is_applied() {
        let o = orchestrator(&["a", "b"], Arc::new(MemoryAlertSink::new()));
        let config = PipelineConfig::default().with_interval("a", Duration::from_secs(30));

        o.start_all(Some(config)).await.unwrap();
        let status = o.get_status();
        o.stop_all().await;

        assert_eq!(status.collector("a").unwrap().update_interval, Duration::from_secs(30));
        assert_eq!(status.collector("b").unwrap().update_interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_metrics_report_counts_states() {
        let o = orchestrator(&["a", "b"], Arc::new(MemoryAlertSink::new()));
        o.start_all(None).await.unwrap();

        let report = o.get_metrics(24).await;
        o.stop_all().await;

        assert_eq!(report.window_hours, 24);
        assert_eq!(report.records_in_window, Some(0));
        assert_eq!(report.collectors_running, 2);
        assert_eq!(report.collectors.len(), 2);
    }
}
