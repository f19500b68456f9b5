use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------
// Data types
// ------------------------------------------------------------
//
// Coarse category tag carried by every normalized record.
//
// `(source_id, data_type)` is the upsert key in every backend.
// Only `MarketTrend` is append-only: trend observations are
// time-series deltas, not current-state snapshots.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    PlayerStats,
    GameData,
    InjuryReport,
    WeatherReport,
    MarketPricing,
    BettingLine,
    MarketTrend,
}

impl DataType {
    /// Stable storage name, used in backend keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayerStats => "player_stats",
            Self::GameData => "game_data",
            Self::InjuryReport => "injury_report",
            Self::WeatherReport => "weather_report",
            Self::MarketPricing => "market_pricing",
            Self::BettingLine => "betting_line",
            Self::MarketTrend => "market_trend",
        }
    }

    /// True for time-series types that are inserted as new rows.
    pub fn is_append_only(&self) -> bool {
        matches!(self, Self::MarketTrend)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Central record type produced by every collector.
///
/// This is the unified shape exchanged between:
/// - Source adapters (league, conditions, market)
/// - The collector runtime
/// - Persistence backends (memory, Redis)
///
/// `data_type` is always derived from the payload, so the tag
/// and the content can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Unique key within the source namespace (`<source>:<scope>:<id>`)
    pub source_id: String,

    /// Name of the originating collector
    pub source: String,

    /// Typed content
    pub payload: Payload,

    /// Collection timestamp
    pub observed_at: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn new(
        source: &str,
        source_id: String,
        payload: Payload,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id,
            source: source.to_string(),
            payload,
            observed_at,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.payload.data_type()
    }
}

// ------------------------------------------------------------
// Payloads
// ------------------------------------------------------------
//
// The `kind` field is added by serde and used to deserialize
// stored records back into the right variant.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    PlayerStats(PlayerStats),
    GameData(GameData),
    InjuryReport(InjuryReport),
    WeatherReport(WeatherReport),
    MarketPricing(MarketPricing),
    BettingLine(BettingLine),
    MarketTrend(MarketTrend),
}

impl Payload {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::PlayerStats(_) => DataType::PlayerStats,
            Self::GameData(_) => DataType::GameData,
            Self::InjuryReport(_) => DataType::InjuryReport,
            Self::WeatherReport(_) => DataType::WeatherReport,
            Self::MarketPricing(_) => DataType::MarketPricing,
            Self::BettingLine(_) => DataType::BettingLine,
            Self::MarketTrend(_) => DataType::MarketTrend,
        }
    }
}

/// Per-player statistics snapshot for one sport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub sport: String,
    pub player_id: String,
    pub name: String,
    pub team: Option<String>,
    pub position: Option<String>,

    /// Raw stat line (e.g. "passing_yards" -> 287.0)
    #[serde(default)]
    pub stats: std::collections::BTreeMap<String, f64>,

    pub fantasy_points: Option<f64>,
}

/// Schedule / score state for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameData {
    pub sport: String,
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: Option<DateTime<Utc>>,
    pub status: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub venue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub sport: String,
    pub player_id: String,
    pub name: String,
    pub team: Option<String>,

    /// Designation as published (e.g. "questionable", "out")
    pub status: String,
    pub body_part: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub game_id: String,
    pub venue: Option<String>,
    pub temperature_f: Option<f64>,
    pub wind_mph: Option<f64>,
    pub precipitation_chance: Option<f64>,
    pub conditions: Option<String>,
}

/// DFS salary / ownership for one player on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPricing {
    pub sport: String,
    pub player_id: String,
    pub platform: String,
    pub salary: f64,
    pub ownership_pct: Option<f64>,
}

/// Sportsbook line for one game at one bookmaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BettingLine {
    pub sport: String,
    pub game_id: String,
    pub bookmaker: String,
    pub spread: Option<f64>,
    pub total: Option<f64>,
    pub home_moneyline: Option<i32>,
    pub away_moneyline: Option<i32>,
}

/// One observed movement of a market value.
///
/// Appended, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrend {
    /// Key of the record whose value moved
    pub entity_id: String,

    /// Moved field ("spread", "total", "salary")
    pub field: String,
    pub previous: f64,
    pub current: f64,
    pub delta: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_trends_are_append_only() {
        assert!(DataType::MarketTrend.is_append_only());
        assert!(!DataType::BettingLine.is_append_only());
        assert!(!DataType::PlayerStats.is_append_only());
    }

    #[test]
    fn test_payload_tag_is_serialized() {
        let payload = Payload::WeatherReport(WeatherReport {
            game_id: "g1".into(),
            venue: None,
            temperature_f: Some(41.0),
            wind_mph: None,
            precipitation_chance: None,
            conditions: None,
        });

        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["kind"], "weather_report");

        let back: Payload = serde_json::from_value(v).unwrap();
        assert_eq!(back.data_type(), DataType::WeatherReport);
    }
}
