//! # meterd Counter Cache
//!
//! Redis-resident state for the hot paths of the metering service:
//!
//! - **Window counters**: monotonically increasing integers per
//!   (tenant, resource, feature, period, window). `INCRBY` is the
//!   serialization point; concurrent increments never lose updates. The
//!   trailing `EXPIRE` may race with other writers, which at worst
//!   refreshes the TTL.
//! - **Aggregate cache**: opaque `"total:count"` snapshots of computed
//!   rollups, published by the aggregation engine.
//! - **Quota cache**: short-lived copies of quota configuration rows.
//!
//! The key layout is a published contract (operators inspect these keys
//! directly), and the window suffix is always derived from the window
//! start produced by the window calculus, never from a raw timestamp.
//!
//! Counters are advisory: ingest treats them as best-effort and the quota
//! evaluator falls back to the durable store on a miss. Absence of a key
//! is therefore meaningful and distinct from a zero value.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use meterd_core::errors::{CacheError, CacheResult};
use meterd_core::{Period, RedisConfig, TimeWindow};

/// Default TTL for cached rollup snapshots.
pub const AGGREGATE_TTL_SECS: u64 = 3_600;

/// Default TTL for cached quota configuration.
pub const QUOTA_TTL_SECS: u64 = 300;

/// Counter key: `meter:counter:{tenant}:{resource}:{feature}:{period}:{YYYY-MM-DD-HH}`.
///
/// The hour suffix collapses to `00` for non-hourly periods because the
/// suffix is formatted from the normalized window start.
pub fn counter_key(
    tenant_id: &str,
    resource: &str,
    feature: &str,
    period: Period,
    window_start: DateTime<Utc>,
) -> String {
    format!(
        "meter:counter:{}:{}:{}:{}:{}",
        tenant_id,
        resource,
        feature,
        period,
        window_start.format("%Y-%m-%d-%H")
    )
}

/// Aggregate cache key: `meter:aggregate:{tenant}:{resource}:{feature}:{window_type}:{YYYY-MM-DD-HH}`.
pub fn aggregate_key(
    tenant_id: &str,
    resource: &str,
    feature: &str,
    window_type: Period,
    window_start: DateTime<Utc>,
) -> String {
    format!(
        "meter:aggregate:{}:{}:{}:{}:{}",
        tenant_id,
        resource,
        feature,
        window_type,
        window_start.format("%Y-%m-%d-%H")
    )
}

/// Quota cache key: `meter:quota:{tenant}:{feature}`.
pub fn quota_key(tenant_id: &str, feature: &str) -> String {
    format!("meter:quota:{}:{}", tenant_id, feature)
}

/// Quota configuration as held in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuota {
    pub limit_value: i64,
    pub period: Period,
    pub alert_threshold: i32,
}

impl CachedQuota {
    fn encode(&self) -> String {
        format!("{}:{}:{}", self.limit_value, self.period, self.alert_threshold)
    }

    fn decode(key: &str, payload: &str) -> CacheResult<Self> {
        let malformed = || CacheError::MalformedPayload {
            key: key.to_string(),
        };
        let mut parts = payload.splitn(3, ':');
        let limit_value = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| malformed())?;
        let period = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| malformed())?;
        let alert_threshold = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| malformed())?;
        Ok(Self {
            limit_value,
            period,
            alert_threshold,
        })
    }
}

/// Redis-backed counter cache.
///
/// Holds a [`ConnectionManager`] that multiplexes commands over one
/// connection and reconnects transparently; clones share the underlying
/// connection.
#[derive(Clone)]
pub struct CounterCache {
    conn: ConnectionManager,
}

impl CounterCache {
    /// Connect to the cache engine.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            CacheError::Connection {
                message: format!("invalid Redis URL: {e}"),
            }
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection {
                message: format!("failed to connect to Redis: {e}"),
            })?;

        debug!("connected counter cache at {}", config.url);
        Ok(Self { conn })
    }

    /// Atomically add `delta` to the counter for the window of `period`
    /// containing `ts` and return the new value. Sets the period TTL after
    /// the increment; the TTL write is allowed to race.
    pub async fn increment_counter(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        period: Period,
        ts: DateTime<Utc>,
        delta: i64,
    ) -> CacheResult<i64> {
        let window = TimeWindow::containing(ts, period);
        let key = counter_key(tenant_id, resource, feature, period, window.start);
        let mut conn = self.conn.clone();

        let value: i64 = conn.incr(&key, delta).await.map_err(command_error)?;

        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(period.counter_ttl_secs())
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(value)
    }

    /// Read the counter for the window of `period` containing `ts`.
    /// `None` means the key is absent, which is distinct from zero.
    pub async fn get_counter(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        period: Period,
        ts: DateTime<Utc>,
    ) -> CacheResult<Option<i64>> {
        let window = TimeWindow::containing(ts, period);
        let key = counter_key(tenant_id, resource, feature, period, window.start);
        let mut conn = self.conn.clone();

        conn.get(&key).await.map_err(command_error)
    }

    /// Write an absolute counter value with the period TTL. Used by the
    /// quota evaluator to warm the cache after a cold-path read.
    pub async fn set_counter(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        period: Period,
        ts: DateTime<Utc>,
        value: i64,
    ) -> CacheResult<()> {
        let window = TimeWindow::containing(ts, period);
        let key = counter_key(tenant_id, resource, feature, period, window.start);
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, value, period.counter_ttl_secs())
            .await
            .map_err(command_error)
    }

    /// Cache a computed rollup as `"total:count"`.
    pub async fn set_aggregate(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        window_type: Period,
        window_start: DateTime<Utc>,
        total_quantity: i64,
        event_count: i64,
    ) -> CacheResult<()> {
        let key = aggregate_key(tenant_id, resource, feature, window_type, window_start);
        let payload = format!("{total_quantity}:{event_count}");
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, payload, AGGREGATE_TTL_SECS)
            .await
            .map_err(command_error)
    }

    /// Read a cached rollup, returning `(total_quantity, event_count)`.
    pub async fn get_aggregate(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        window_type: Period,
        window_start: DateTime<Utc>,
    ) -> CacheResult<Option<(i64, i64)>> {
        let key = aggregate_key(tenant_id, resource, feature, window_type, window_start);
        let mut conn = self.conn.clone();

        let payload: Option<String> = conn.get(&key).await.map_err(command_error)?;
        payload
            .map(|p| {
                let malformed = || CacheError::MalformedPayload { key: key.clone() };
                let (total, count) = p.split_once(':').ok_or_else(|| malformed())?;
                Ok((
                    total.parse().map_err(|_| malformed())?,
                    count.parse().map_err(|_| malformed())?,
                ))
            })
            .transpose()
    }

    /// Cache a quota configuration row.
    pub async fn set_quota(
        &self,
        tenant_id: &str,
        feature: &str,
        quota: &CachedQuota,
    ) -> CacheResult<()> {
        let key = quota_key(tenant_id, feature);
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, quota.encode(), QUOTA_TTL_SECS)
            .await
            .map_err(command_error)
    }

    /// Read a cached quota configuration row.
    pub async fn get_quota(&self, tenant_id: &str, feature: &str) -> CacheResult<Option<CachedQuota>> {
        let key = quota_key(tenant_id, feature);
        let mut conn = self.conn.clone();

        let payload: Option<String> = conn.get(&key).await.map_err(command_error)?;
        payload.map(|p| CachedQuota::decode(&key, &p)).transpose()
    }

    /// Liveness probe for health checks.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(command_error)
    }
}

fn command_error(e: redis::RedisError) -> CacheError {
    CacheError::Command {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn counter_key_uses_window_start_suffix() {
        // Raw timestamp is mid-window; the suffix must reflect the start.
        let start = TimeWindow::containing(ts("2025-03-10T12:45:30Z"), Period::Hourly).start;
        let key = counter_key("t1", "billing", "invoice", Period::Hourly, start);
        assert_eq!(key, "meter:counter:t1:billing:invoice:hourly:2025-03-10-12");
    }

    #[test]
    fn non_hourly_suffix_collapses_to_hour_zero() {
        let daily = TimeWindow::containing(ts("2025-03-10T12:45:30Z"), Period::Daily).start;
        assert_eq!(
            counter_key("t1", "r", "f", Period::Daily, daily),
            "meter:counter:t1:r:f:daily:2025-03-10-00"
        );

        let monthly = TimeWindow::containing(ts("2025-03-10T12:45:30Z"), Period::Monthly).start;
        assert_eq!(
            counter_key("t1", "r", "f", Period::Monthly, monthly),
            "meter:counter:t1:r:f:monthly:2025-03-01-00"
        );
    }

    #[test]
    fn aggregate_and_quota_key_layouts() {
        let start = ts("2025-03-10T12:00:00Z");
        assert_eq!(
            aggregate_key("t1", "r", "f", Period::Hourly, start),
            "meter:aggregate:t1:r:f:hourly:2025-03-10-12"
        );
        assert_eq!(quota_key("t1", "f"), "meter:quota:t1:f");
    }

    #[test]
    fn cached_quota_round_trips() {
        let quota = CachedQuota {
            limit_value: 1000,
            period: Period::Monthly,
            alert_threshold: 80,
        };
        let decoded = CachedQuota::decode("k", &quota.encode()).unwrap();
        assert_eq!(decoded, quota);
    }

    #[test]
    fn malformed_quota_payload_is_rejected() {
        assert!(CachedQuota::decode("k", "1000:monthly").is_err());
        assert!(CachedQuota::decode("k", "x:monthly:80").is_err());
        assert!(CachedQuota::decode("k", "1000:weekly:80").is_err());
    }
}
