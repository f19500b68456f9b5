use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    collector::{DataSource, FetchTarget},
    error::NormalizeError,
    schema::{BettingLine, MarketPricing, MarketTrend, NormalizedRecord, Payload},
    util,
};

use super::{ExternalId, HttpFeed};

pub const NAME: &str = "market";

const FEED_ODDS: &str = "odds";
const FEED_SALARIES: &str = "salaries";

/// Sportsbook line and DFS pricing source
///
/// Endpoints (per sport):
/// - GET <base>/<sport>/odds      -> one line per game and bookmaker
/// - GET <base>/<sport>/salaries  -> one price per player and platform
///
/// Besides the current-state records, every observed movement of a
/// spread, total or salary is emitted as an append-only `MarketTrend`.
pub struct MarketSource {
    feed: HttpFeed,
    sports: Vec<String>,
    trends: TrendTracker,
}

impl MarketSource {
    pub fn new(feed: HttpFeed, sports: Vec<String>) -> Self {
        Self {
            feed,
            sports,
            trends: TrendTracker::default(),
        }
    }
}

#[async_trait::async_trait]
impl DataSource for MarketSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn targets(&self) -> Vec<FetchTarget> {
        self.sports
            .iter()
            .flat_map(|sport| {
                [
                    FetchTarget::new(FEED_ODDS, sport.clone()),
                    FetchTarget::new(FEED_SALARIES, sport.clone()),
                ]
            })
            .collect()
    }

    async fn fetch(&self, target: &FetchTarget) -> anyhow::Result<Vec<Value>> {
        self.feed
            .get_items(&format!("{}/{}", target.scope, target.feed))
            .await
    }

    fn normalize(
        &self,
        target: &FetchTarget,
        raw: &Value,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedRecord>, NormalizeError> {
        match target.feed {
            FEED_ODDS => normalize_odds(&self.trends, &target.scope, raw, observed_at),
            FEED_SALARIES => normalize_salary(&self.trends, &target.scope, raw, observed_at),
            other => Err(NormalizeError::UnsupportedFeed(other.to_string())),
        }
    }
}

// ------------------------------------------------------------
// Trend tracking
// ------------------------------------------------------------
//
// Remembers the last observed value per (entity, field). A value
// seen for the first time produces no trend.
//
#[derive(Default)]
pub struct TrendTracker {
    last: Mutex<HashMap<(String, &'static str), f64>>,
}

impl TrendTracker {
    /// Records `current` and returns the movement since the last observation.
    pub fn observe(&self, entity_id: &str, field: &'static str, current: f64) -> Option<MarketTrend> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last.insert((entity_id.to_string(), field), current)?;

        let delta = current - previous;
        if delta.abs() < f64::EPSILON {
            return None;
        }

        Some(MarketTrend {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            previous,
            current,
            delta,
        })
    }
}

fn trend_record(trend: MarketTrend, observed_at: DateTime<Utc>) -> NormalizedRecord {
    NormalizedRecord::new(NAME, trend.entity_id.clone(), Payload::MarketTrend(trend), observed_at)
}

#[derive(Deserialize)]
struct OddsWire {
    game_id: ExternalId,
    bookmaker: String,
    spread: Option<f64>,
    total: Option<f64>,
    home_moneyline: Option<i32>,
    away_moneyline: Option<i32>,
}

#[derive(Deserialize)]
struct SalaryWire {
    player_id: ExternalId,
    platform: String,
    salary: f64,
    ownership_pct: Option<f64>,
}

pub fn normalize_odds(
    trends: &TrendTracker,
    sport: &str,
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<Vec<NormalizedRecord>, NormalizeError> {
    let wire = OddsWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_ODDS, e))?;

    let game_id = wire.game_id.to_string();
    let bookmaker = wire.bookmaker.to_lowercase();
    let source_id = util::source_key(NAME, sport, &format!("{}:{}", game_id, bookmaker));

    let mut records = Vec::with_capacity(3);
    for (field, value) in [("spread", wire.spread), ("total", wire.total)] {
        if let Some(trend) = value.and_then(|v| trends.observe(&source_id, field, v)) {
            records.push(trend_record(trend, observed_at));
        }
    }

    records.insert(
        0,
        NormalizedRecord::new(
            NAME,
            source_id,
            Payload::BettingLine(BettingLine {
                sport: sport.to_string(),
                game_id,
                bookmaker,
                spread: wire.spread,
                total: wire.total,
                home_moneyline: wire.home_moneyline,
                away_moneyline: wire.away_moneyline,
            }),
            observed_at,
        ),
    );
    Ok(records)
}

pub fn normalize_salary(
    trends: &TrendTracker,
    sport: &str,
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<Vec<NormalizedRecord>, NormalizeError> {
    let wire = SalaryWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_SALARIES, e))?;
    if wire.salary < 0.0 {
        return Err(NormalizeError::malformed(
            FEED_SALARIES,
            format!("negative salary {}", wire.salary),
        ));
    }

    let player_id = wire.player_id.to_string();
    let platform = wire.platform.to_lowercase();
    let source_id = util::source_key(NAME, sport, &format!("{}:{}", player_id, platform));

    let trend = trends.observe(&source_id, "salary", wire.salary);

    let mut records = vec![NormalizedRecord::new(
        NAME,
        source_id,
        Payload::MarketPricing(MarketPricing {
            sport: sport.to_string(),
            player_id,
            platform,
            salary: wire.salary,
            ownership_pct: wire.ownership_pct,
        }),
        observed_at,
    )];
    if let Some(trend) = trend {
        records.push(trend_record(trend, observed_at));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use serde_json::json;

    #[test]
    fn test_first_observation_has_no_trend() {
        let tracker = TrendTracker::default();
        let raw = json!({ "game_id": "g1", "bookmaker": "BookA", "spread": -3.5, "total": 47.5 });

        let records = normalize_odds(&tracker, "nfl", &raw, Utc::now()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data_type(), DataType::BettingLine);
        assert_eq!(records[0].source_id, "market:nfl:g1:booka");
    }

    #[test]
    fn test_line_movement_emits_trends() {
        let tracker = TrendTracker::default();
        let first = json!({ "game_id": "g1", "bookmaker": "booka", "spread": -3.5, "total": 47.5 });
        let moved = json!({ "game_id": "g1", "bookmaker": "booka", "spread": -6.0, "total": 47.5 });

        normalize_odds(&tracker, "nfl", &first, Utc::now()).unwrap();
        let records = normalize_odds(&tracker, "nfl", &moved, Utc::now()).unwrap();

        assert_eq!(records.len(), 2);
        let Payload::MarketTrend(t) = &records[1].payload else {
            panic!("expected trend");
        };
        assert_eq!(t.field, "spread");
        assert_eq!(t.previous, -3.5);
        assert_eq!(t.delta, -2.5);
    }

    #[test]
    fn test_salary_change_emits_trend() {
        let tracker = TrendTracker::default();
        let a = json!({ "player_id": 12, "platform": "DK", "salary": 7200.0 });
        let b = json!({ "player_id": 12, "platform": "DK", "salary": 7500.0 });

        assert_eq!(normalize_salary(&tracker, "nba", &a, Utc::now()).unwrap().len(), 1);
        let records = normalize_salary(&tracker, "nba", &b, Utc::now()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data_type(), DataType::MarketTrend);
    }

    #[test]
    fn test_negative_salary_is_rejected() {
        let tracker = TrendTracker::default();
        let raw = json!({ "player_id": 12, "platform": "DK", "salary": -1.0 });
        assert!(normalize_salary(&tracker, "nba", &raw, Utc::now()).is_err());
    }
}
