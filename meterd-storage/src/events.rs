//! Raw event persistence
//!
//! Events are append-only: a row is written once on ingest and never
//! modified. Reads are filtered and paginated, ordered newest-first with
//! the id as a tiebreak so pagination is stable for equal timestamps.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use meterd_core::errors::{EventError, EventResult, ValidationError};
use meterd_core::{Metadata, NewEvent, UsageEvent};

/// Largest accepted batch; bigger batches are rejected before any write.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Filters for the paginated event listing.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub tenant_id: Option<String>,
    pub resource: Option<String>,
    pub feature: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// 1-indexed page selection, page size in `[1, 1000]`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

impl Pagination {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page < 1 {
            return Err(ValidationError::Pagination {
                message: format!("page must be >= 1, got {}", self.page),
            });
        }
        if !(1..=1_000).contains(&self.page_size) {
            return Err(ValidationError::Pagination {
                message: format!("page_size must be 1..=1000, got {}", self.page_size),
            });
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// One (tenant, resource, feature) group of a per-window usage scan.
#[derive(Debug, Clone)]
pub struct UsageGroup {
    pub tenant_id: String,
    pub resource: String,
    pub feature: String,
    pub total_quantity: i64,
    pub event_count: i64,
}

/// Repository for raw metering events.
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a single event. The id and `created_at` are assigned here;
    /// a missing timestamp was already resolved by the caller.
    pub async fn create(
        &self,
        event: &NewEvent,
        timestamp: DateTime<Utc>,
    ) -> EventResult<UsageEvent> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let metadata_json = metadata_to_json(&event.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO metering_events
                (id, tenant_id, resource, feature, quantity, timestamp, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&event.tenant_id)
        .bind(&event.resource)
        .bind(&event.feature)
        .bind(event.quantity)
        .bind(timestamp)
        .bind(&metadata_json)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(UsageEvent {
            id,
            tenant_id: event.tenant_id.clone(),
            resource: event.resource.clone(),
            feature: event.feature.clone(),
            quantity: event.quantity,
            timestamp,
            metadata: event.metadata.clone(),
            created_at,
        })
    }

    /// Insert a batch of events inside one transaction. Either every row
    /// commits or none does.
    pub async fn create_batch(
        &self,
        events: &[(NewEvent, DateTime<Utc>)],
    ) -> EventResult<Vec<UsageEvent>> {
        if events.is_empty() || events.len() > MAX_BATCH_SIZE {
            return Err(EventError::StoreFailed {
                message: format!("batch size {} outside 1..=1000", events.len()),
            });
        }

        let created_at = Utc::now();
        let mut persisted = Vec::with_capacity(events.len());
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for (event, timestamp) in events {
            let id = Uuid::new_v4();
            let metadata_json = metadata_to_json(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO metering_events
                    (id, tenant_id, resource, feature, quantity, timestamp, metadata, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(id)
            .bind(&event.tenant_id)
            .bind(&event.resource)
            .bind(&event.feature)
            .bind(event.quantity)
            .bind(timestamp)
            .bind(&metadata_json)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            persisted.push(UsageEvent {
                id,
                tenant_id: event.tenant_id.clone(),
                resource: event.resource.clone(),
                feature: event.feature.clone(),
                quantity: event.quantity,
                timestamp: *timestamp,
                metadata: event.metadata.clone(),
                created_at,
            });
        }

        tx.commit().await.map_err(store_error)?;
        Ok(persisted)
    }

    /// Filtered, paginated listing ordered `timestamp DESC, id DESC`.
    /// Returns the page items together with the unpaginated total.
    pub async fn get_all(
        &self,
        filters: &EventFilters,
        pagination: Pagination,
    ) -> EventResult<(Vec<UsageEvent>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM metering_events
            WHERE ($1::VARCHAR IS NULL OR tenant_id = $1)
              AND ($2::VARCHAR IS NULL OR resource = $2)
              AND ($3::VARCHAR IS NULL OR feature = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR timestamp >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR timestamp <= $5)
            "#,
        )
        .bind(&filters.tenant_id)
        .bind(&filters.resource)
        .bind(&filters.feature)
        .bind(filters.start_date)
        .bind(filters.end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM metering_events
            WHERE ($1::VARCHAR IS NULL OR tenant_id = $1)
              AND ($2::VARCHAR IS NULL OR resource = $2)
              AND ($3::VARCHAR IS NULL OR feature = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR timestamp >= $4)
              AND ($5::TIMESTAMPTZ IS NULL OR timestamp <= $5)
            ORDER BY timestamp DESC, id DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(&filters.tenant_id)
        .bind(&filters.resource)
        .bind(&filters.feature)
        .bind(filters.start_date)
        .bind(filters.end_date)
        .bind(i64::from(pagination.page_size))
        .bind(pagination.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        let events = rows
            .iter()
            .map(row_to_event)
            .collect::<EventResult<Vec<_>>>()?;
        Ok((events, total))
    }

    /// Sum of quantities for a tenant over the half-open window
    /// `[start, end)`, optionally narrowed by resource and feature.
    pub async fn get_usage_summary(
        &self,
        tenant_id: &str,
        resource: Option<&str>,
        feature: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EventResult<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM metering_events
            WHERE tenant_id = $1
              AND timestamp >= $2
              AND timestamp < $3
              AND ($4::VARCHAR IS NULL OR resource = $4)
              AND ($5::VARCHAR IS NULL OR feature = $5)
            "#,
        )
        .bind(tenant_id)
        .bind(start)
        .bind(end)
        .bind(resource)
        .bind(feature)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)
    }

    /// Group usage by (tenant, resource, feature) over the half-open
    /// window `[start, end)`. Feeds the aggregation engine.
    pub async fn group_usage(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EventResult<Vec<UsageGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, resource, feature,
                   COALESCE(SUM(quantity), 0)::BIGINT AS total_quantity,
                   COUNT(*)::BIGINT AS event_count
            FROM metering_events
            WHERE timestamp >= $1 AND timestamp < $2
            GROUP BY tenant_id, resource, feature
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                Ok(UsageGroup {
                    tenant_id: row.try_get("tenant_id").map_err(query_error)?,
                    resource: row.try_get("resource").map_err(query_error)?,
                    feature: row.try_get("feature").map_err(query_error)?,
                    total_quantity: row.try_get("total_quantity").map_err(query_error)?,
                    event_count: row.try_get("event_count").map_err(query_error)?,
                })
            })
            .collect()
    }
}

fn row_to_event(row: &PgRow) -> EventResult<UsageEvent> {
    let metadata: Option<serde_json::Value> = row.try_get("metadata").map_err(query_error)?;
    let metadata: Option<Metadata> = metadata
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| EventError::QueryFailed {
            message: format!("malformed event metadata: {e}"),
        })?;

    Ok(UsageEvent {
        id: row.try_get("id").map_err(query_error)?,
        tenant_id: row.try_get("tenant_id").map_err(query_error)?,
        resource: row.try_get("resource").map_err(query_error)?,
        feature: row.try_get("feature").map_err(query_error)?,
        quantity: row.try_get("quantity").map_err(query_error)?,
        timestamp: row.try_get("timestamp").map_err(query_error)?,
        metadata,
        created_at: row.try_get("created_at").map_err(query_error)?,
    })
}

fn metadata_to_json(metadata: &Option<Metadata>) -> EventResult<Option<serde_json::Value>> {
    metadata
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| EventError::StoreFailed {
            message: format!("unserializable event metadata: {e}"),
        })
}

fn store_error(e: sqlx::Error) -> EventError {
    EventError::StoreFailed {
        message: e.to_string(),
    }
}

fn query_error(e: sqlx::Error) -> EventError {
    EventError::QueryFailed {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_offset() {
        let p = Pagination::default();
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, 50);
        assert_eq!(p.offset(), 0);

        let p = Pagination {
            page: 3,
            page_size: 200,
        };
        assert_eq!(p.offset(), 400);
    }

    #[test]
    fn pagination_bounds_are_enforced() {
        assert!(Pagination { page: 0, page_size: 50 }.validate().is_err());
        assert!(Pagination { page: 1, page_size: 0 }.validate().is_err());
        assert!(Pagination { page: 1, page_size: 1_001 }.validate().is_err());
        assert!(Pagination { page: 1, page_size: 1_000 }.validate().is_ok());
    }
}
