use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::util;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Pipeline timing (monitor cadence, staleness, fetch timeout)
// - Enabled sources and their parameters
// - The persistence backend
// - An optional alert forwarder
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Pipeline-wide timing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// List of source configurations
    pub sources: Vec<SourceConfig>,

    /// Persistence backend
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Optional WebSocket alert forwarder
    pub alerting: Option<AlertingConfig>,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Reads a JSON configuration file from disk and validates it.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                bail!("duplicate source name '{}'", source.name);
            }
            if source.interval_secs == Some(0) {
                bail!("source '{}' has a zero interval", source.name);
            }
        }

        if self.persistence.backend == PersistenceBackend::Redis
            && self.persistence.redis_url.is_none()
        {
            bail!("persistence backend 'redis' requires redis_url");
        }

        Ok(())
    }

    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .map_or(false, |d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Pipeline configuration
// ------------------------------------------------------------
//
// Set once at startup (or passed to `start_all`).
//
// Notes:
// - `intervals` holds per-collector overrides; a collector not
//   listed falls back to its source default.
// - A collector is stale when
//   `now - last_update > interval * staleness_multiplier`.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Monitor tick cadence, independent of every collector
    #[serde(rename = "monitor_interval_secs", deserialize_with = "util::deserialize_secs")]
    pub monitor_interval: Duration,

    pub staleness_multiplier: f64,

    /// Per sub-fetch timeout
    #[serde(rename = "fetch_timeout_secs", deserialize_with = "util::deserialize_secs")]
    pub fetch_timeout: Duration,

    /// Metrics reporter cadence (binary only)
    #[serde(rename = "metrics_interval_secs", deserialize_with = "util::deserialize_secs")]
    pub metrics_interval: Duration,

    /// Per-collector interval overrides, filled from `sources[]`
    #[serde(skip)]
    pub intervals: Vec<(String, Duration)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            staleness_multiplier: 2.0,
            fetch_timeout: Duration::from_secs(20),
            metrics_interval: Duration::from_secs(60),
            intervals: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.monitor_interval.is_zero() {
            bail!("monitor_interval_secs must be positive");
        }
        if !(self.staleness_multiplier > 0.0) || !self.staleness_multiplier.is_finite() {
            bail!("staleness_multiplier must be a positive number");
        }
        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout_secs must be positive");
        }
        if self.metrics_interval.is_zero() {
            bail!("metrics_interval_secs must be positive");
        }
        Ok(())
    }

    /// Registers an interval override for one collector.
    pub fn with_interval(mut self, name: &str, interval: Duration) -> Self {
        self.intervals.retain(|(n, _)| n != name);
        self.intervals.push((name.to_string(), interval));
        self
    }

    /// Resolves the effective interval for a collector.
    pub fn interval_for(&self, name: &str, default: Duration) -> Duration {
        self.intervals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
            .unwrap_or(default)
    }

    /// Largest gap allowed between two successful cycles.
    ///
    /// Saturates instead of overflowing for absurd multipliers.
    pub fn staleness_allowance(&self, interval: Duration) -> Duration {
        Duration::try_from_secs_f64(interval.as_secs_f64() * self.staleness_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

// ------------------------------------------------------------
// Source configuration
// ------------------------------------------------------------
//
// Configuration for a single external data source.
//
// Each source runs as an independent collector and may fan out
// one sub-fetch per sport and feed.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Source identifier ("league", "conditions", "market")
    pub name: String,

    /// Enables or disables this source at runtime
    pub enabled: bool,

    /// Polling period override in seconds
    pub interval_secs: Option<u64>,

    /// Base URL of the upstream JSON API (no trailing slash)
    pub base_url: String,

    /// Sent as `x-api-key` when present
    pub api_key: Option<String>,

    /// Sports to fan out over (e.g. "nfl", "nba")
    #[serde(default)]
    pub sports: Vec<String>,
}

// ------------------------------------------------------------
// Persistence configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,

    pub redis_url: Option<String>,

    /// Prefix for every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Memory,
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "pipeline".to_string()
}

// ------------------------------------------------------------
// Alert forwarder configuration
// ------------------------------------------------------------
//
// Notes:
// - The `key` is security-sensitive and must never be committed.
// - `demo` disables the network; alerts are only logged.
//
#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    /// WebSocket URL of the operator service
    pub url: String,

    /// Authentication key (sent as: key=XYZ&role=pipeline)
    pub key: String,

    /// Number of parallel WebSocket connections
    #[serde(default = "default_connections")]
    pub connections: usize,

    pub demo: Option<bool>,
}

fn default_connections() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables debug-level logging and raw alert frame logging
    pub log: Option<bool>,
}

/// Builds the effective pipeline config, folding `sources[].interval_secs`
/// into the per-collector override table.
pub fn pipeline_config(cfg: &Config) -> PipelineConfig {
    cfg.sources
        .iter()
        .filter_map(|s| s.interval_secs.map(|secs| (s.name.as_str(), secs)))
        .fold(cfg.pipeline.clone(), |pc, (name, secs)| {
            pc.with_interval(name, Duration::from_secs(secs))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "pipeline": { "monitor_interval_secs": 30, "staleness_multiplier": 3.0 },
        "sources": [
            { "name": "league", "enabled": true, "interval_secs": 120,
              "base_url": "http://localhost:9000", "sports": ["nfl"] },
            { "name": "market", "enabled": false,
              "base_url": "http://localhost:9001" }
        ]
    }"#;

    #[test]
    fn test_load_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::File::create(&path)
            .unwrap()
            .write_all(SAMPLE.as_bytes())
            .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.pipeline.monitor_interval, Duration::from_secs(30));
        assert_eq!(cfg.pipeline.fetch_timeout, Duration::from_secs(20));
        assert_eq!(cfg.persistence.backend, PersistenceBackend::Memory);

        let pc = pipeline_config(&cfg);
        let default = Duration::from_secs(60);
        assert_eq!(pc.interval_for("league", default), Duration::from_secs(120));
        assert_eq!(pc.interval_for("market", default), default);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_values() {
        let mut cfg: Config = serde_json::from_str(SAMPLE).unwrap();
        cfg.sources[1].name = "league".into();
        assert!(cfg.validate().is_err());

        let mut cfg: Config = serde_json::from_str(SAMPLE).unwrap();
        cfg.pipeline.staleness_multiplier = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg: Config = serde_json::from_str(SAMPLE).unwrap();
        cfg.persistence.backend = PersistenceBackend::Redis;
        assert!(cfg.validate().is_err());
    }
}
