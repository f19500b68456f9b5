use std::time::Duration;

use log::info;
use redis::aio::MultiplexedConnection;

use crate::error::SinkError;
use crate::schema::NormalizedRecord;
use crate::util;

use super::persistence::{PersistenceSink, WRITE_LOG_RETENTION};

/// Redis persistence backend.
///
/// KEY LAYOUT:
/// - `<prefix>:record:<data_type>:<source_id>`  current value (SET, JSON)
/// - `<prefix>:trend:<data_type>`               append-only rows (RPUSH, JSON)
/// - `<prefix>:writes`                          write log (ZSET, score = ms)
///
/// Every write goes through one MULTI pipeline so the value and its
/// write-log entry land together.
///
/// THREADING:
/// - `MultiplexedConnection` is cheap to clone and safe to use from
///   many tasks at once; each call clones its own handle.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, SinkError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis persistence at {}", url);

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn record_key(&self, record: &NormalizedRecord) -> String {
        format!(
            "{}:record:{}:{}",
            self.prefix,
            record.data_type(),
            record.source_id
        )
    }

    fn trend_key(&self, record: &NormalizedRecord) -> String {
        format!("{}:trend:{}", self.prefix, record.data_type())
    }

    fn writes_key(&self) -> String {
        format!("{}:writes", self.prefix)
    }

    /// Appends the write-log commands to a pipeline.
    ///
    /// Members must be unique, otherwise two writes in the same
    /// millisecond would collapse into one ZSET entry.
    fn log_write(&self, pipe: &mut redis::Pipeline) {
        let now = util::now_ms();
        let member = format!("{}:{:016x}", now, rand::random::<u64>());
        let cutoff = window_floor(now, WRITE_LOG_RETENTION);

        pipe.cmd("ZADD")
            .arg(self.writes_key())
            .arg(now)
            .arg(member)
            .ignore();
        pipe.cmd("ZREMRANGEBYSCORE")
            .arg(self.writes_key())
            .arg("-inf")
            .arg(format!("({}", cutoff))
            .ignore();
    }
}

#[async_trait::async_trait]
impl PersistenceSink for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn upsert(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("SET").arg(self.record_key(record)).arg(json).ignore();
        self.log_write(&mut pipe);

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn append_only(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("RPUSH").arg(self.trend_key(record)).arg(json).ignore();
        self.log_write(&mut pipe);

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn count_recent_by_window(&self, window: Duration) -> Result<u64, SinkError> {
        let min = window_floor(util::now_ms(), window);

        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(self.writes_key())
            .arg(min)
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// Lowest write-log score inside `window`, saturating instead of wrapping.
fn window_floor(now_ms: i64, window: Duration) -> i64 {
    let span = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_floor_saturates() {
        assert_eq!(window_floor(10_000, Duration::from_secs(3)), 7_000);
        assert_eq!(window_floor(10_000, Duration::MAX), 10_000 - i64::MAX);
        assert_eq!(
            window_floor(10_000, Duration::from_secs(1_000_000_000_000 * 3600)),
            10_000 - 3_600_000_000_000_000_000
        );
    }
}
