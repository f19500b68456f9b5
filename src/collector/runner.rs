use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};

use crate::{
    collector::source::DataSource,
    collector::status::{CollectorState, CollectorStatus, StatusHandle},
    error::CollectorError,
    metrics::RuntimeMetrics,
    sinks::{PersistenceSink, persist},
};

/// Outcome of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records written to the persistence sink
    pub persisted: u64,

    /// Sub-fetch, normalization and persistence failures
    pub errors: usize,

    /// True when every sub-fetch failed; `last_update` is not advanced
    pub failed: bool,
}

/// Everything a cycle needs, cloned into the collector task.
#[derive(Clone)]
struct CycleContext {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn PersistenceSink>,
    metrics: Arc<RuntimeMetrics>,
    status: StatusHandle,
    fetch_timeout: Duration,

    /// Bumped on every start; status writes from an older run are dropped
    generation: Arc<AtomicU64>,

    /// Held for the whole cycle, shared by the timer loop and
    /// `fetch_and_process`
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
}

struct ActiveRun {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RunSlot {
    active: Option<ActiveRun>,

    /// Task of a stopped run whose in-flight cycle may still be finishing
    draining: Option<JoinHandle<()>>,
}

/// Runtime of one source: timer loop, fan-out, persistence, liveness.
///
/// GUARANTEES:
/// - A failed cycle never stops the loop
/// - Cycles of one collector never overlap, including across
///   stop/start: a new run waits for the previous run's task
/// - `stop()` prevents future ticks but lets an in-flight cycle finish
///
pub struct Collector {
    ctx: CycleContext,
    run: Mutex<RunSlot>,
}

impl Collector {
    pub fn new(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn PersistenceSink>,
        metrics: Arc<RuntimeMetrics>,
        fetch_timeout: Duration,
    ) -> Self {
        let status = StatusHandle::new(CollectorStatus::new(
            source.name(),
            source.default_interval(),
        ));

        Self {
            ctx: CycleContext {
                source,
                sink,
                metrics,
                status,
                fetch_timeout,
                generation: Arc::new(AtomicU64::new(0)),
                cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            run: Mutex::new(RunSlot::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.ctx.source.name()
    }

    pub fn default_interval(&self) -> Duration {
        self.ctx.source.default_interval()
    }

    pub fn status(&self) -> &StatusHandle {
        &self.ctx.status
    }

    pub fn is_running(&self) -> bool {
        self.slot().active.is_some()
    }

    fn slot(&self) -> MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs an immediate cycle, then one every `interval`.
    ///
    /// Starting a running collector is a logged no-op.
    pub fn start(&self, interval: Duration) -> Result<(), CollectorError> {
        if interval.is_zero() {
            return Err(CollectorError::InvalidInterval {
                name: self.name().to_string(),
                interval,
            });
        }

        let mut slot = self.slot();
        if slot.active.is_some() {
            warn!("[{}] start requested while already running, ignoring", self.name());
            return Ok(());
        }

        let generation = self.ctx.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.ctx.status.update(|s| {
            s.state = CollectorState::Running;
            s.update_interval = interval;
            s.started_at = Some(Utc::now());
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let previous = slot.draining.take();
        let handle = tokio::spawn(run_loop(
            self.ctx.clone(),
            generation,
            interval,
            stop_rx,
            previous,
        ));

        slot.active = Some(ActiveRun { stop_tx, handle });
        info!("[{}] started, interval {:?}", self.name(), interval);
        Ok(())
    }

    /// Cancels future ticks. Idempotent.
    pub fn stop(&self) {
        let mut slot = self.slot();
        match slot.active.take() {
            Some(run) => {
                let _ = run.stop_tx.send(true);
                slot.draining = Some(run.handle);
                info!("[{}] stop requested", self.name());
            }
            None => debug!("[{}] stop requested while not running", self.name()),
        }
    }

    /// Stops and waits until an in-flight cycle has finished.
    ///
    /// Callers must serialize lifecycle operations on one collector;
    /// the orchestrator does so with its lifecycle lock.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let draining = self.slot().draining.take();
        if let Some(handle) = draining {
            if let Err(e) = handle.await {
                warn!("[{}] collector task ended abnormally: {}", self.name(), e);
            }
        }
    }

    /// Stops, clears counters and errors, and starts again with the
    /// currently configured interval.
    pub async fn restart(&self) -> Result<(), CollectorError> {
        self.stop_and_wait().await;

        let interval = self.ctx.status.update(|s| {
            s.reset();
            s.update_interval
        });

        info!("[{}] restarting", self.name());
        self.start(interval)
    }

    /// Runs one cycle immediately, outside the timer.
    ///
    /// Waits for an in-flight timer cycle first; cycles of one
    /// collector never overlap.
    pub async fn fetch_and_process(&self) -> CycleReport {
        let generation = self.ctx.generation.load(Ordering::SeqCst);
        self.ctx.run_cycle(generation).await
    }
}

/// Timer loop of one run.
///
/// The first tick of a tokio interval completes immediately, which
/// gives the immediate first cycle. Missed ticks are skipped, so a
/// long cycle delays the schedule instead of queueing a burst.
async fn run_loop(
    ctx: CycleContext,
    generation: u64,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break,

            _ = ticker.tick() => {
                ctx.run_cycle(generation).await;
            }
        }
    }

    if ctx.generation.load(Ordering::SeqCst) == generation {
        ctx.status.update(|s| s.state = CollectorState::Stopped);
    }
    info!("[{}] stopped", ctx.source.name());
}

impl CycleContext {
    /// One fetch cycle: fan out, normalize, persist, update status.
    ///
    /// Sub-fetches are all-settled; each item and each record fails
    /// on its own.
    async fn run_cycle(&self, generation: u64) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;

        let name = self.source.name();
        let started = Instant::now();
        let targets = self.source.targets();

        let fetches = targets.iter().map(|target| async move {
            let result = match timeout(self.fetch_timeout, self.source.fetch(target)).await {
                Ok(Ok(items)) => Ok(items),
                Ok(Err(e)) => Err(CollectorError::Fetch {
                    target: target.to_string(),
                    message: format!("{:#}", e),
                }),
                Err(_) => {
                    RuntimeMetrics::incr(&self.metrics.fetch_timeouts);
                    Err(CollectorError::Timeout {
                        target: target.to_string(),
                        timeout: self.fetch_timeout,
                    })
                }
            };
            (target, result)
        });
        let settled = join_all(fetches).await;

        let observed_at = Utc::now();
        let mut errors: Vec<CollectorError> = Vec::new();
        let mut fetched_ok = 0usize;
        let mut persisted = 0u64;

        for (target, result) in settled {
            let items = match result {
                Ok(items) => {
                    fetched_ok += 1;
                    items
                }
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            for raw in &items {
                let records = match self.source.normalize(target, raw, observed_at) {
                    Ok(records) => records,
                    Err(e) => {
                        errors.push(e.into());
                        continue;
                    }
                };

                for record in records {
                    match persist(self.sink.as_ref(), &record).await {
                        Ok(()) => persisted += 1,
                        Err(cause) => errors.push(CollectorError::Persist {
                            source_id: record.source_id.clone(),
                            cause,
                        }),
                    }
                }
            }
        }

        let failed = !targets.is_empty() && fetched_ok == 0;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        for e in &errors {
            warn!("[{}] {}", name, e);
        }

        RuntimeMetrics::add(&self.metrics.records_persisted, persisted);
        RuntimeMetrics::add(&self.metrics.record_errors, errors.len() as u64);
        if failed {
            RuntimeMetrics::incr(&self.metrics.cycles_failed);
        } else {
            RuntimeMetrics::incr(&self.metrics.cycles_completed);
        }

        let report = CycleReport {
            persisted,
            errors: errors.len(),
            failed,
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("[{}] dropping status update of a superseded run", name);
            return report;
        }

        let now = Utc::now();
        self.status.update(|s| {
            for e in errors {
                s.push_error(now, e.to_string());
            }
            s.records_processed += persisted;

            if failed {
                s.state = CollectorState::Errored;
            } else {
                s.last_update = Some(now);
                s.cycles_completed += 1;
                s.last_cycle_ms = Some(elapsed_ms);
                s.state = CollectorState::Running;
            }
        });

        if failed {
            warn!("[{}] cycle failed, all {} sub-fetches errored", name, targets.len());
        } else {
            debug!(
                "[{}] cycle completed in {}ms: {} persisted, {} errors",
                name, elapsed_ms, report.persisted, report.errors
            );
        }

        report
    }
}
