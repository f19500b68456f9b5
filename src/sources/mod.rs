//! Source registry and shared HTTP plumbing
//!
//! This module provides:
//! - Central registration of all supported sources
//! - A factory function resolving sources by configured name
//! - `HttpFeed`, the JSON-over-HTTP client every source uses
//!
//! All domain-specific logic lives in the dedicated source modules.
//! The rest of the application interacts exclusively through the
//! `DataSource` trait.

pub mod conditions;
pub mod league;
pub mod market;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::collector::DataSource;
use crate::config::SourceConfig;

/// Sports polled when a source config lists none.
pub const DEFAULT_SPORTS: [&str; 4] = ["nfl", "nba", "mlb", "nhl"];

/// Returns a source instance for a configured name.
///
/// CONTRACT:
/// - `cfg.name` must match a source's `name()`
/// - Unknown names return `None`; the caller decides whether to skip
///
pub fn get_source(cfg: &SourceConfig, client: reqwest::Client) -> Option<Arc<dyn DataSource>> {
    let feed = HttpFeed::new(client, cfg);
    let sports = sports_of(cfg);

    match cfg.name.as_str() {
        league::NAME => Some(Arc::new(league::LeagueSource::new(feed, sports))),
        conditions::NAME => Some(Arc::new(conditions::ConditionsSource::new(feed, sports))),
        market::NAME => Some(Arc::new(market::MarketSource::new(feed, sports))),
        _ => None,
    }
}

fn sports_of(cfg: &SourceConfig) -> Vec<String> {
    if cfg.sports.is_empty() {
        DEFAULT_SPORTS.iter().map(|s| s.to_string()).collect()
    } else {
        cfg.sports.iter().map(|s| s.to_lowercase()).collect()
    }
}

/// GET-only JSON client bound to one base URL.
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpFeed {
    pub fn new(client: reqwest::Client, cfg: &SourceConfig) -> Self {
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }

    /// Fetches `<base_url>/<path>` and returns its item list.
    pub async fn get_items(&self, path: &str) -> anyhow::Result<Vec<Value>> {
        let url = format!("{}/{}", self.base_url, path);

        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let body: Value = req
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()
            .with_context(|| format!("GET {}", url))?
            .json()
            .await
            .with_context(|| format!("decoding {}", url))?;

        items_of(body).with_context(|| format!("GET {}", url))
    }
}

/// Accepts either a bare array or an object wrapping it in `data`.
pub fn items_of(body: Value) -> anyhow::Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => bail!("response object has no `data` array"),
        },
        other => bail!("unexpected response shape: {}", type_name(&other)),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Upstream identifiers arrive as strings or integers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Text(String),
    Number(i64),
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Text(s) => f.write_str(s),
            ExternalId::Number(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_of_accepts_both_shapes() {
        assert_eq!(items_of(json!([1, 2])).unwrap().len(), 2);
        assert_eq!(items_of(json!({ "data": [1] })).unwrap().len(), 1);
        assert!(items_of(json!({ "items": [] })).is_err());
        assert!(items_of(json!("nope")).is_err());
    }

    #[test]
    fn test_external_id_display() {
        let n: ExternalId = serde_json::from_value(json!(4046)).unwrap();
        let s: ExternalId = serde_json::from_value(json!("g-17")).unwrap();
        assert_eq!(n.to_string(), "4046");
        assert_eq!(s.to_string(), "g-17");
    }
}
