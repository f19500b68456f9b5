use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    collector::{DataSource, FetchTarget},
    error::NormalizeError,
    schema::{InjuryReport, NormalizedRecord, Payload, WeatherReport},
    util,
};

use super::{ExternalId, HttpFeed};

pub const NAME: &str = "conditions";

const FEED_INJURIES: &str = "injuries";
const FEED_WEATHER: &str = "weather";
const WEATHER_SCOPE: &str = "all";

/// Injury and weather source
///
/// Endpoints:
/// - GET <base>/<sport>/injuries  (one sub-fetch per sport)
/// - GET <base>/weather           (single sub-fetch, all venues)
pub struct ConditionsSource {
    feed: HttpFeed,
    sports: Vec<String>,
}

impl ConditionsSource {
    pub fn new(feed: HttpFeed, sports: Vec<String>) -> Self {
        Self { feed, sports }
    }
}

#[async_trait::async_trait]
impl DataSource for ConditionsSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(600)
    }

    fn targets(&self) -> Vec<FetchTarget> {
        let mut targets: Vec<FetchTarget> = self
            .sports
            .iter()
            .map(|sport| FetchTarget::new(FEED_INJURIES, sport.clone()))
            .collect();
        targets.push(FetchTarget::new(FEED_WEATHER, WEATHER_SCOPE));
        targets
    }

    async fn fetch(&self, target: &FetchTarget) -> anyhow::Result<Vec<Value>> {
        match target.feed {
            FEED_WEATHER => self.feed.get_items("weather").await,
            _ => self.feed.get_items(&format!("{}/injuries", target.scope)).await,
        }
    }

    fn normalize(
        &self,
        target: &FetchTarget,
        raw: &Value,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedRecord>, NormalizeError> {
        let record = match target.feed {
            FEED_INJURIES => normalize_injury(&target.scope, raw, observed_at)?,
            FEED_WEATHER => normalize_weather(raw, observed_at)?,
            other => return Err(NormalizeError::UnsupportedFeed(other.to_string())),
        };
        Ok(vec![record])
    }
}

#[derive(Deserialize)]
struct InjuryWire {
    player_id: ExternalId,
    name: String,
    team: Option<String>,
    status: String,
    body_part: Option<String>,
}

#[derive(Deserialize)]
struct WeatherWire {
    game_id: ExternalId,
    venue: Option<String>,
    temperature_f: Option<f64>,
    wind_mph: Option<f64>,
    precipitation_chance: Option<f64>,
    conditions: Option<String>,
}

pub fn normalize_injury(
    sport: &str,
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let wire = InjuryWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_INJURIES, e))?;

    let player_id = wire.player_id.to_string();
    Ok(NormalizedRecord::new(
        NAME,
        util::source_key(NAME, sport, &player_id),
        Payload::InjuryReport(InjuryReport {
            sport: sport.to_string(),
            player_id,
            name: wire.name,
            team: wire.team,
            status: wire.status.to_lowercase(),
            body_part: wire.body_part,
        }),
        observed_at,
    ))
}

pub fn normalize_weather(
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let wire = WeatherWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_WEATHER, e))?;

    // Probability must be a fraction; some feeds send percent
    let precipitation_chance = match wire.precipitation_chance {
        Some(p) if !(0.0..=100.0).contains(&p) => {
            return Err(NormalizeError::malformed(
                FEED_WEATHER,
                format!("precipitation_chance out of range: {}", p),
            ));
        }
        Some(p) if p > 1.0 => Some(p / 100.0),
        other => other,
    };

    let game_id = wire.game_id.to_string();
    Ok(NormalizedRecord::new(
        NAME,
        util::source_key(NAME, WEATHER_SCOPE, &game_id),
        Payload::WeatherReport(WeatherReport {
            game_id,
            venue: wire.venue,
            temperature_f: wire.temperature_f,
            wind_mph: wire.wind_mph,
            precipitation_chance,
            conditions: wire.conditions,
        }),
        observed_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_injury_status_is_lowercased() {
        let raw = json!({ "player_id": "p9", "name": "A. Player", "status": "Questionable" });
        let rec = normalize_injury("nba", &raw, Utc::now()).unwrap();

        assert_eq!(rec.source_id, "conditions:nba:p9");
        let Payload::InjuryReport(r) = rec.payload else {
            panic!("expected injury report");
        };
        assert_eq!(r.status, "questionable");
    }

    #[test]
    fn test_weather_percent_is_scaled() {
        let raw = json!({ "game_id": 77, "precipitation_chance": 40.0, "wind_mph": 12.0 });
        let rec = normalize_weather(&raw, Utc::now()).unwrap();

        assert_eq!(rec.source_id, "conditions:all:77");
        let Payload::WeatherReport(w) = rec.payload else {
            panic!("expected weather report");
        };
        assert_eq!(w.precipitation_chance, Some(0.4));
    }

    #[test]
    fn test_weather_out_of_range_is_rejected() {
        let raw = json!({ "game_id": 77, "precipitation_chance": 140.0 });
        assert!(normalize_weather(&raw, Utc::now()).is_err());
    }
}
