use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::NormalizeError;
use crate::schema::NormalizedRecord;

/// One sub-fetch of a collector cycle.
///
/// A cycle fans out over every target returned by
/// `DataSource::targets()`; targets are fetched concurrently and
/// settle independently.
///
/// EXAMPLES:
/// - { feed: "players", scope: "nfl" }
/// - { feed: "weather", scope: "all" }
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub feed: &'static str,
    pub scope: String,
}

impl FetchTarget {
    pub fn new(feed: &'static str, scope: impl Into<String>) -> Self {
        Self {
            feed,
            scope: scope.into(),
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.feed)
    }
}

/// DataSource is the abstraction layer between:
/// - The generic collector runtime (timers, fan-out, persistence)
/// - One external data domain (league data, conditions, market)
///
/// Each source implementation must:
/// - Enumerate the sub-fetches of one cycle
/// - Fetch raw JSON items for one sub-fetch
/// - Normalize raw items into `NormalizedRecord`s
///
/// DESIGN GOALS:
/// - No scheduling, timeout or persistence logic inside sources
/// - Uniform output format across all sources
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by the collector task across cycles
///
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Stable collector name, also used as `NormalizedRecord::source`
    /// and as the `source_id` prefix.
    fn name(&self) -> &'static str;

    /// Polling period used when the config has no override.
    fn default_interval(&self) -> Duration;

    /// Sub-fetches of one cycle.
    fn targets(&self) -> Vec<FetchTarget>;

    /// Fetches the raw items of one sub-fetch.
    ///
    /// Timeouts are applied by the runtime; an implementation
    /// only reports transport or decoding failures.
    async fn fetch(&self, target: &FetchTarget) -> anyhow::Result<Vec<Value>>;

    /// Maps one raw item into zero or more records.
    ///
    /// IMPORTANT:
    /// - Must never panic
    /// - A malformed item returns `Err` and only that item is lost
    ///
    fn normalize(
        &self,
        target: &FetchTarget,
        raw: &Value,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedRecord>, NormalizeError>;
}
