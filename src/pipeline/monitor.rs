use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::json;

use crate::{
    collector::{CollectorState, StatusHandle},
    config::PipelineConfig,
    metrics::RuntimeMetrics,
    sinks::{Alert, AlertKind, AlertSink, PersistenceSink, Severity},
    util,
};

/// What one monitor tick observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Collectors found stale on this tick
    pub stale: Vec<String>,

    /// Writes in the last window, `None` if the backend failed
    pub records_in_window: Option<u64>,

    /// True when this tick raised the no-data alert
    pub no_data_raised: bool,
}

/// Health checks run on the monitor cadence.
///
/// Reads collector status through `StatusHandle` snapshots and
/// reacts only by marking a collector `Errored` and raising alerts.
/// It never restarts anything.
///
/// DE-DUPLICATION:
/// - A stale collector is alerted once per staleness episode
/// - The no-data alert fires once per zero-volume episode and is
///   re-armed by the first tick that sees records again
pub struct HealthMonitor {
    alerts: Arc<dyn AlertSink>,
    sink: Arc<dyn PersistenceSink>,
    metrics: Arc<RuntimeMetrics>,
    config: PipelineConfig,
    stale: HashSet<String>,
    no_data_active: bool,
}

impl HealthMonitor {
    pub fn new(
        alerts: Arc<dyn AlertSink>,
        sink: Arc<dyn PersistenceSink>,
        metrics: Arc<RuntimeMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            alerts,
            sink,
            metrics,
            config,
            stale: HashSet::new(),
            no_data_active: false,
        }
    }

    pub fn window(&self) -> Duration {
        self.config.monitor_interval
    }

    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        collectors: &[StatusHandle],
        pipeline_running: bool,
    ) -> TickReport {
        let mut report = TickReport::default();

        let mut newly_stale = Vec::new();
        for handle in collectors {
            match self.check_staleness(now, handle) {
                Some(stale) => {
                    report.stale.push(stale.name.clone());
                    if self.stale.insert(stale.name.clone()) {
                        newly_stale.push(stale);
                    }
                }
                None => {
                    self.stale.remove(&handle.name());
                }
            }
        }

        for stale in newly_stale {
            let alert = Alert::new(
                AlertKind::Staleness,
                Severity::Medium,
                format!("Collector {} is stale", stale.name),
                "Pipeline may be stuck: no successful cycle within the allowed window",
                json!({
                    "collector": stale.name,
                    "update_interval_secs": stale.interval.as_secs_f64(),
                    "staleness_multiplier": self.config.staleness_multiplier,
                    "last_update": stale.last_update,
                }),
            );
            deliver(self.alerts.as_ref(), &self.metrics, alert).await;
        }

        if !pipeline_running {
            return report;
        }

        match self.sink.count_recent_by_window(self.window()).await {
            Ok(0) => {
                report.records_in_window = Some(0);
                if !self.no_data_active {
                    self.no_data_active = true;
                    report.no_data_raised = true;

                    let alert = Alert::new(
                        AlertKind::NoData,
                        Severity::High,
                        "No data collected",
                        "No records were persisted by any collector in the last monitoring window",
                        json!({ "window_secs": self.window().as_secs_f64() }),
                    );
                    deliver(self.alerts.as_ref(), &self.metrics, alert).await;
                }
            }
            Ok(n) => {
                report.records_in_window = Some(n);
                if self.no_data_active {
                    info!("Data flow resumed: {} records in the last window", n);
                }
                self.no_data_active = false;
            }
            Err(e) => {
                warn!("No-data check skipped, persistence count failed: {}", e);
            }
        }

        report
    }

    /// Marks the collector `Errored` when stale.
    ///
    /// Check and mark happen under one lock so a concurrent cycle
    /// completion cannot interleave.
    fn check_staleness(&self, now: DateTime<Utc>, handle: &StatusHandle) -> Option<StaleCollector> {
        let stale = handle.update(|s| {
            if s.state == CollectorState::Stopped {
                return None;
            }
            let baseline = s.staleness_baseline()?;
            let allowed = self.config.staleness_allowance(s.update_interval);
            if !util::elapsed_exceeds(baseline, now, allowed) {
                return None;
            }

            s.state = CollectorState::Errored;
            Some(StaleCollector {
                name: s.name.clone(),
                interval: s.update_interval,
                last_update: s.last_update,
            })
        });

        if let Some(stale) = &stale {
            debug!("[{}] stale", stale.name);
        }
        stale
    }
}

struct StaleCollector {
    name: String,
    interval: Duration,
    last_update: Option<DateTime<Utc>>,
}

/// Delivers an alert; failures are logged and counted, never propagated.
pub async fn deliver(alerts: &dyn AlertSink, metrics: &RuntimeMetrics, alert: Alert) {
    RuntimeMetrics::incr(&metrics.alerts_raised);
    if let Err(e) = alerts.raise(&alert).await {
        RuntimeMetrics::incr(&metrics.alert_failures);
        warn!("Failed to deliver alert '{}': {}", alert.title, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorStatus;
    use crate::schema::{NormalizedRecord, Payload, WeatherReport};
    use crate::sinks::{MemoryAlertSink, MemoryStore, persist};

    fn handle(name: &str, interval_secs: u64, last_update_ago: i64, now: DateTime<Utc>) -> StatusHandle {
        let mut status = CollectorStatus::new(name, Duration::from_secs(interval_secs));
        status.state = CollectorState::Running;
        status.started_at = Some(now - chrono::Duration::seconds(3600));
        status.last_update = Some(now - chrono::Duration::seconds(last_update_ago));
        StatusHandle::new(status)
    }

    fn monitor(alerts: Arc<MemoryAlertSink>, store: Arc<MemoryStore>) -> HealthMonitor {
        let config = PipelineConfig {
            staleness_multiplier: 2.0,
            ..PipelineConfig::default()
        };
        HealthMonitor::new(alerts, store, Arc::new(RuntimeMetrics::default()), config)
    }

    async fn write_one(store: &MemoryStore) {
        let rec = NormalizedRecord::new(
            "conditions",
            "conditions:all:g1".into(),
            Payload::WeatherReport(WeatherReport {
                game_id: "g1".into(),
                venue: None,
                temperature_f: None,
                wind_mph: None,
                precipitation_chance: None,
                conditions: None,
            }),
            Utc::now(),
        );
        persist(store, &rec).await.unwrap();
    }

    #[tokio::test]
    async fn test_staleness_threshold() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let mut m = monitor(alerts.clone(), Arc::new(MemoryStore::new()));
        let now = Utc::now();

        let stale = handle("a", 30, 61, now);
        let fresh = handle("b", 30, 59, now);

        let report = m.tick(now, &[stale.clone(), fresh.clone()], false).await;

        assert_eq!(report.stale, vec!["a".to_string()]);
        assert_eq!(stale.state(), CollectorState::Errored);
        assert_eq!(fresh.state(), CollectorState::Running);
        assert_eq!(alerts.count_of(AlertKind::Staleness), 1);
    }

    #[tokio::test]
    async fn test_stale_collector_alerted_once_per_episode() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let mut m = monitor(alerts.clone(), Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let h = handle("a", 30, 120, now);

        m.tick(now, &[h.clone()], false).await;
        m.tick(now, &[h.clone()], false).await;
        assert_eq!(alerts.count_of(AlertKind::Staleness), 1);

        // Recovers, then goes stale again
        h.update(|s| s.last_update = Some(now));
        m.tick(now, &[h.clone()], false).await;
        h.update(|s| s.last_update = Some(now - chrono::Duration::seconds(120)));
        m.tick(now, &[h.clone()], false).await;
        assert_eq!(alerts.count_of(AlertKind::Staleness), 2);
    }

    #[tokio::test]
    async fn test_stopped_collectors_are_not_checked() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let mut m = monitor(alerts.clone(), Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let h = handle("a", 30, 600, now);
        h.update(|s| s.state = CollectorState::Stopped);

        let report = m.tick(now, &[h.clone()], false).await;

        assert!(report.stale.is_empty());
        assert_eq!(h.state(), CollectorState::Stopped);
    }

    #[tokio::test]
    async fn test_no_data_alert_is_deduplicated() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            monitor_interval: Duration::from_millis(50),
            ..PipelineConfig::default()
        };
        let mut m = HealthMonitor::new(
            alerts.clone(),
            store.clone(),
            Arc::new(RuntimeMetrics::default()),
            config,
        );
        let now = Utc::now();

        for _ in 0..3 {
            m.tick(now, &[], true).await;
        }
        assert_eq!(alerts.count_of(AlertKind::NoData), 1);

        write_one(&store).await;
        let report = m.tick(now, &[], true).await;
        assert_eq!(report.records_in_window, Some(1));
        assert_eq!(alerts.count_of(AlertKind::NoData), 1);

        // The window slides past the write: a fresh alert
        tokio::time::sleep(Duration::from_millis(80)).await;
        let report = m.tick(Utc::now(), &[], true).await;
        assert!(report.no_data_raised);
        assert_eq!(alerts.count_of(AlertKind::NoData), 2);
    }

    #[tokio::test]
    async fn test_no_data_check_skipped_when_not_running() {
        let alerts = Arc::new(MemoryAlertSink::new());
        let mut m = monitor(alerts.clone(), Arc::new(MemoryStore::new()));

        let report = m.tick(Utc::now(), &[], false).await;

        assert_eq!(report.records_in_window, None);
        assert_eq!(alerts.count_of(AlertKind::NoData), 0);
    }
}
