use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    collector::{DataSource, FetchTarget},
    error::NormalizeError,
    schema::{GameData, NormalizedRecord, Payload, PlayerStats},
    util,
};

use super::{ExternalId, HttpFeed};

pub const NAME: &str = "league";

const FEED_PLAYERS: &str = "players";
const FEED_GAMES: &str = "games";

/// League data source
///
/// Endpoints (per sport):
/// - GET <base>/<sport>/players/stats  -> player stat lines
/// - GET <base>/<sport>/games          -> schedule and scores
///
/// DESIGN:
/// - Pure protocol translation
/// - No state
pub struct LeagueSource {
    feed: HttpFeed,
    sports: Vec<String>,
}

impl LeagueSource {
    pub fn new(feed: HttpFeed, sports: Vec<String>) -> Self {
        Self { feed, sports }
    }
}

#[async_trait::async_trait]
impl DataSource for LeagueSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn targets(&self) -> Vec<FetchTarget> {
        self.sports
            .iter()
            .flat_map(|sport| {
                [
                    FetchTarget::new(FEED_PLAYERS, sport.clone()),
                    FetchTarget::new(FEED_GAMES, sport.clone()),
                ]
            })
            .collect()
    }

    async fn fetch(&self, target: &FetchTarget) -> anyhow::Result<Vec<Value>> {
        let path = match target.feed {
            FEED_PLAYERS => format!("{}/players/stats", target.scope),
            _ => format!("{}/games", target.scope),
        };
        self.feed.get_items(&path).await
    }

    fn normalize(
        &self,
        target: &FetchTarget,
        raw: &Value,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedRecord>, NormalizeError> {
        let record = match target.feed {
            FEED_PLAYERS => normalize_player(&target.scope, raw, observed_at)?,
            FEED_GAMES => normalize_game(&target.scope, raw, observed_at)?,
            other => return Err(NormalizeError::UnsupportedFeed(other.to_string())),
        };
        Ok(vec![record])
    }
}

// ------------------------------------------------------------
// Wire formats
// ------------------------------------------------------------

#[derive(Deserialize)]
struct PlayerWire {
    player_id: ExternalId,
    name: String,
    team: Option<String>,
    position: Option<String>,
    #[serde(default)]
    stats: BTreeMap<String, f64>,
    fantasy_points: Option<f64>,
}

#[derive(Deserialize)]
struct GameWire {
    game_id: ExternalId,
    home_team: String,
    away_team: String,
    start_time: Option<DateTime<Utc>>,
    #[serde(default = "scheduled")]
    status: String,
    home_score: Option<u32>,
    away_score: Option<u32>,
    venue: Option<String>,
}

fn scheduled() -> String {
    "scheduled".to_string()
}

pub fn normalize_player(
    sport: &str,
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let wire = PlayerWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_PLAYERS, e))?;
    if wire.name.trim().is_empty() {
        return Err(NormalizeError::MissingField {
            feed: FEED_PLAYERS.to_string(),
            field: "name",
        });
    }

    let player_id = wire.player_id.to_string();
    Ok(NormalizedRecord::new(
        NAME,
        util::source_key(NAME, sport, &player_id),
        Payload::PlayerStats(PlayerStats {
            sport: sport.to_string(),
            player_id,
            name: wire.name,
            team: wire.team,
            position: wire.position,
            stats: wire.stats,
            fantasy_points: wire.fantasy_points,
        }),
        observed_at,
    ))
}

pub fn normalize_game(
    sport: &str,
    raw: &Value,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedRecord, NormalizeError> {
    let wire = GameWire::deserialize(raw).map_err(|e| NormalizeError::malformed(FEED_GAMES, e))?;

    let game_id = wire.game_id.to_string();
    Ok(NormalizedRecord::new(
        NAME,
        util::source_key(NAME, sport, &game_id),
        Payload::GameData(GameData {
            sport: sport.to_string(),
            game_id,
            home_team: wire.home_team,
            away_team: wire.away_team,
            start_time: wire.start_time,
            status: wire.status.to_lowercase(),
            home_score: wire.home_score,
            away_score: wire.away_score,
            venue: wire.venue,
        }),
        observed_at,
    ))
}
