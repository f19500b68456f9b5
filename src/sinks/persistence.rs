use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SinkError;
use crate::schema::{DataType, NormalizedRecord};

/// Write-log entries older than this are pruned.
pub const WRITE_LOG_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Upsert-capable store shared by every collector.
///
/// CONTRACT:
/// - `upsert` replaces the prior value stored under
///   `(source_id, data_type)`, creating it if absent
/// - `append_only` inserts a new row every time (trend records)
/// - `count_recent_by_window` counts writes of either kind whose
///   write time falls inside the last `window`
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Called concurrently from several collector tasks
///
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upsert(&self, record: &NormalizedRecord) -> Result<(), SinkError>;

    async fn append_only(&self, record: &NormalizedRecord) -> Result<(), SinkError>;

    async fn count_recent_by_window(&self, window: Duration) -> Result<u64, SinkError>;
}

/// Routes a record to `upsert` or `append_only` by its data type.
pub async fn persist(
    sink: &dyn PersistenceSink,
    record: &NormalizedRecord,
) -> Result<(), SinkError> {
    if record.data_type().is_append_only() {
        sink.append_only(record).await
    } else {
        sink.upsert(record).await
    }
}

// ------------------------------------------------------------
// In-memory backend
// ------------------------------------------------------------
//
// Used in `memory` mode and in tests.
//
// Appended trend rows and the write log are both pruned to
// `retention`; current values are kept until replaced.
//
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    retention: chrono::Duration,
}

#[derive(Default)]
struct MemoryInner {
    current: HashMap<(String, DataType), NormalizedRecord>,
    appended: VecDeque<(DateTime<Utc>, NormalizedRecord)>,
    writes: VecDeque<DateTime<Utc>>,
}

impl MemoryInner {
    fn prune(&mut self, now: DateTime<Utc>, retention: chrono::Duration) {
        while self.writes.front().is_some_and(|t| now - *t > retention) {
            self.writes.pop_front();
        }
        while self.appended.front().is_some_and(|(t, _)| now - *t > retention) {
            self.appended.pop_front();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(WRITE_LOG_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store keeping trend rows and write-log entries for `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current value stored under `(source_id, data_type)`.
    pub fn get(&self, source_id: &str, data_type: DataType) -> Option<NormalizedRecord> {
        self.lock()
            .current
            .get(&(source_id.to_string(), data_type))
            .cloned()
    }

    /// All appended rows of one type, in insertion order.
    pub fn appended(&self, data_type: DataType) -> Vec<NormalizedRecord> {
        self.lock()
            .appended
            .iter()
            .map(|(_, r)| r)
            .filter(|r| r.data_type() == data_type)
            .cloned()
            .collect()
    }

    /// Number of distinct upsert keys.
    pub fn key_count(&self) -> usize {
        self.lock().current.len()
    }

    /// Total writes of either kind still in the write log.
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }
}

#[async_trait::async_trait]
impl PersistenceSink for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner
            .current
            .insert((record.source_id.clone(), record.data_type()), record.clone());
        inner.writes.push_back(now);
        inner.prune(now, self.retention);
        Ok(())
    }

    async fn append_only(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner.appended.push_back((now, record.clone()));
        inner.writes.push_back(now);
        inner.prune(now, self.retention);
        Ok(())
    }

    async fn count_recent_by_window(&self, window: Duration) -> Result<u64, SinkError> {
        // A window reaching past the representable range counts everything
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));

        let inner = self.lock();
        let count = match cutoff {
            Some(cutoff) => inner.writes.iter().filter(|t| **t >= cutoff).count(),
            None => inner.writes.len(),
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BettingLine, MarketTrend, Payload};

    fn line(spread: f64) -> NormalizedRecord {
        NormalizedRecord::new(
            "market",
            "market:nfl:g1:book".into(),
            Payload::BettingLine(BettingLine {
                sport: "nfl".into(),
                game_id: "g1".into(),
                bookmaker: "book".into(),
                spread: Some(spread),
                total: None,
                home_moneyline: None,
                away_moneyline: None,
            }),
            Utc::now(),
        )
    }

    fn trend(current: f64) -> NormalizedRecord {
        NormalizedRecord::new(
            "market",
            "market:nfl:g1:book".into(),
            Payload::MarketTrend(MarketTrend {
                entity_id: "market:nfl:g1:book".into(),
                field: "spread".into(),
                previous: -3.0,
                current,
                delta: current + 3.0,
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_upsert_same_record_twice_is_idempotent() {
        let store = MemoryStore::new();
        let rec = line(-3.5);

        persist(&store, &rec).await.unwrap();
        let first = store.get(&rec.source_id, DataType::BettingLine);

        persist(&store, &rec).await.unwrap();
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.get(&rec.source_id, DataType::BettingLine), first);
    }

    #[tokio::test]
    async fn test_upsert_replaces_prior_value() {
        let store = MemoryStore::new();
        persist(&store, &line(-3.5)).await.unwrap();
        persist(&store, &line(-6.0)).await.unwrap();

        assert_eq!(store.key_count(), 1);
        let stored = store.get("market:nfl:g1:book", DataType::BettingLine).unwrap();
        match stored.payload {
            Payload::BettingLine(l) => assert_eq!(l.spread, Some(-6.0)),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trends_are_appended_not_merged() {
        let store = MemoryStore::new();
        persist(&store, &trend(-4.0)).await.unwrap();
        persist(&store, &trend(-4.0)).await.unwrap();

        assert_eq!(store.appended(DataType::MarketTrend).len(), 2);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_count_recent_by_window_counts_both_kinds() {
        let store = MemoryStore::new();
        persist(&store, &line(-3.5)).await.unwrap();
        persist(&store, &trend(-4.0)).await.unwrap();

        let n = store
            .count_recent_by_window(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_unbounded_window_does_not_overflow() {
        let store = MemoryStore::new();
        persist(&store, &line(-3.5)).await.unwrap();

        let huge = Duration::from_secs(1_000_000_000_000 * 3600);
        assert_eq!(store.count_recent_by_window(huge).await.unwrap(), 1);
        assert_eq!(store.count_recent_by_window(Duration::MAX).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_old_trend_rows_are_pruned() {
        let store = MemoryStore::with_retention(Duration::from_millis(50));
        persist(&store, &trend(-4.0)).await.unwrap();
        persist(&store, &trend(-5.0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        persist(&store, &trend(-6.0)).await.unwrap();

        let rows = store.appended(DataType::MarketTrend);
        assert_eq!(rows.len(), 1);
        match &rows[0].payload {
            Payload::MarketTrend(t) => assert_eq!(t.current, -6.0),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(store.write_count(), 1);
    }
}
