/// Utility helpers used by the collectors, sinks and the orchestrator.
///
/// This module contains:
/// - Time helpers
/// - Serde helpers for `Duration` fields
/// - Small identifier helpers
///
/// IMPORTANT:
/// - No source-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Returns the current Unix timestamp in milliseconds.
///
/// Used for write-log scores in the persistence backends and for
/// ping / login timing on the alert forwarder.
///
/// A clock before UNIX_EPOCH yields 0 instead of panicking.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Builds the canonical record key: `<source>:<scope>:<external id>`.
///
/// Examples:
/// - ("league", "nfl", "4046")  -> "league:nfl:4046"
/// - ("market", "nba", "g-17")  -> "market:nba:g-17"
///
pub fn source_key(source: &str, scope: &str, external_id: &str) -> String {
    format!("{}:{}:{}", source, scope.to_lowercase(), external_id)
}

/// Returns true when more than `allowed` has elapsed between `since` and `now`.
///
/// The comparison is strict: exactly `allowed` is still fresh.
/// A `since` in the future counts as fresh.
pub fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, allowed: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed > allowed,
        Err(_) => false,
    }
}

/// Serializes a `Duration` as fractional seconds.
pub fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Deserializes (possibly fractional) seconds into a `Duration`.
pub fn deserialize_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_key_lowercases_scope() {
        assert_eq!(source_key("league", "NFL", "4046"), "league:nfl:4046");
    }

    #[test]
    fn test_elapsed_exceeds_is_strict() {
        let now = Utc::now();
        let allowed = Duration::from_secs(60);

        assert!(elapsed_exceeds(now - chrono::Duration::seconds(61), now, allowed));
        assert!(!elapsed_exceeds(now - chrono::Duration::seconds(60), now, allowed));
        assert!(!elapsed_exceeds(now - chrono::Duration::seconds(59), now, allowed));
        assert!(!elapsed_exceeds(now + chrono::Duration::seconds(5), now, allowed));
    }

    #[test]
    fn test_deserialize_fractional_secs() {
        #[derive(serde::Deserialize)]
        struct Wrap {
            #[serde(deserialize_with = "deserialize_secs")]
            d: Duration,
        }

        let w: Wrap = serde_json::from_str(r#"{ "d": 0.25 }"#).unwrap();
        assert_eq!(w.d, Duration::from_millis(250));
        assert!(serde_json::from_str::<Wrap>(r#"{ "d": -1 }"#).is_err());
    }
}
