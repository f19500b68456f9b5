use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::util;

/// Maximum number of entries kept in `recent_errors`.
pub const MAX_RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    Stopped,
    Running,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Liveness record of one registered collector.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub state: CollectorState,

    /// Completion time of the last successful cycle
    pub last_update: Option<DateTime<Utc>>,

    #[serde(rename = "update_interval_secs", serialize_with = "util::serialize_secs")]
    pub update_interval: Duration,

    pub records_processed: u64,

    /// Oldest first, capped at `MAX_RECENT_ERRORS`
    pub recent_errors: VecDeque<ErrorEntry>,

    pub started_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub last_cycle_ms: Option<u64>,
}

impl CollectorStatus {
    pub fn new(name: &str, update_interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: CollectorState::Stopped,
            last_update: None,
            update_interval,
            records_processed: 0,
            recent_errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            started_at: None,
            cycles_completed: 0,
            last_cycle_ms: None,
        }
    }

    /// Appends an error, evicting the oldest beyond the cap.
    pub fn push_error(&mut self, at: DateTime<Utc>, message: String) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(ErrorEntry { at, message });
    }

    /// Clears counters and the error log (collector restart).
    pub fn reset(&mut self) {
        self.records_processed = 0;
        self.recent_errors.clear();
        self.cycles_completed = 0;
        self.last_cycle_ms = None;
    }

    /// Reference point for staleness checks.
    ///
    /// The later of the last successful cycle and the last start, so a
    /// restarted collector gets a full window before its first cycle.
    pub fn staleness_baseline(&self) -> Option<DateTime<Utc>> {
        match (self.last_update, self.started_at) {
            (Some(updated), Some(started)) => Some(updated.max(started)),
            (updated, started) => updated.or(started),
        }
    }
}

/// Shared handle to one collector's status.
///
/// Every mutation happens inside `update`, under the lock, with no
/// await point; `snapshot` therefore never observes a half-applied
/// change.
#[derive(Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<CollectorStatus>>,
}

impl StatusHandle {
    pub fn new(status: CollectorStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(status)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorStatus> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CollectorStatus {
        self.lock().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut CollectorStatus) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn state(&self) -> CollectorState {
        self.lock().state
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_log_keeps_ten_most_recent() {
        let mut status = CollectorStatus::new("league", Duration::from_secs(30));
        for i in 0..15 {
            status.push_error(Utc::now(), format!("failure {}", i));
        }

        assert_eq!(status.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(status.recent_errors.front().unwrap().message, "failure 5");
        assert_eq!(status.recent_errors.back().unwrap().message, "failure 14");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let handle = StatusHandle::new(CollectorStatus::new("market", Duration::from_secs(60)));
        let before = handle.snapshot();

        handle.update(|s| s.records_processed = 42);

        assert_eq!(before.records_processed, 0);
        assert_eq!(handle.snapshot().records_processed, 42);
    }

    #[test]
    fn test_staleness_baseline_prefers_latest() {
        let now = Utc::now();
        let mut status = CollectorStatus::new("league", Duration::from_secs(30));
        assert_eq!(status.staleness_baseline(), None);

        status.started_at = Some(now);
        assert_eq!(status.staleness_baseline(), Some(now));

        status.last_update = Some(now - chrono::Duration::seconds(90));
        assert_eq!(status.staleness_baseline(), Some(now));

        status.last_update = Some(now + chrono::Duration::seconds(5));
        assert_eq!(status.staleness_baseline(), status.last_update);
    }

    #[test]
    fn test_serializes_interval_as_seconds() {
        let status = CollectorStatus::new("conditions", Duration::from_millis(1500));
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["update_interval_secs"], 1.5);
        assert_eq!(v["state"], "stopped");
    }
}
