//! Rollup aggregate persistence
//!
//! Aggregate rows are keyed by the full window identity and upserted with
//! absolute values: recomputation overwrites rather than adds, so running
//! the same computation twice yields identical rows.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use meterd_core::errors::{AggregationError, AggregationResult};
use meterd_core::{Period, UsageAggregate};

/// Filters for the aggregate range query.
#[derive(Debug, Clone)]
pub struct AggregateFilters {
    pub tenant_id: Option<String>,
    pub resource: Option<String>,
    pub feature: Option<String>,
    pub window_type: Period,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Repository for rollup aggregates.
#[derive(Clone)]
pub struct AggregateRepository {
    pool: PgPool,
}

impl AggregateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Absolute upsert on the window identity
    /// (tenant, resource, feature, window_type, window_start, window_end).
    /// Value columns are overwritten, never added to.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        window_type: Period,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        total_quantity: i64,
        event_count: i64,
    ) -> AggregationResult<UsageAggregate> {
        let row = sqlx::query(
            r#"
            INSERT INTO metering_aggregates
                (id, tenant_id, resource, feature, window_start, window_end,
                 window_type, total_quantity, event_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (tenant_id, resource, feature, window_type, window_start, window_end)
            DO UPDATE SET
                total_quantity = EXCLUDED.total_quantity,
                event_count = EXCLUDED.event_count,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(resource)
        .bind(feature)
        .bind(window_start)
        .bind(window_end)
        .bind(window_type.as_str())
        .bind(total_quantity)
        .bind(event_count)
        .fetch_one(&self.pool)
        .await
        .map_err(compute_error)?;

        row_to_aggregate(&row)
    }

    /// Range read for rows of one window type, window-contained in
    /// `[start_date, end_date]`, ordered by window start.
    pub async fn get_aggregates(
        &self,
        filters: &AggregateFilters,
    ) -> AggregationResult<Vec<UsageAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM metering_aggregates
            WHERE window_type = $1
              AND window_start >= $2
              AND window_end <= $3
              AND ($4::VARCHAR IS NULL OR tenant_id = $4)
              AND ($5::VARCHAR IS NULL OR resource = $5)
              AND ($6::VARCHAR IS NULL OR feature = $6)
            ORDER BY window_start
            "#,
        )
        .bind(filters.window_type.as_str())
        .bind(filters.start_date)
        .bind(filters.end_date)
        .bind(&filters.tenant_id)
        .bind(&filters.resource)
        .bind(&filters.feature)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(row_to_aggregate).collect()
    }
}

fn row_to_aggregate(row: &PgRow) -> AggregationResult<UsageAggregate> {
    let window_type: String = row.try_get("window_type").map_err(query_error)?;
    let window_type = window_type
        .parse::<Period>()
        .map_err(|e| AggregationError::QueryFailed {
            message: format!("malformed window_type column: {e}"),
        })?;

    Ok(UsageAggregate {
        tenant_id: row.try_get("tenant_id").map_err(query_error)?,
        resource: row.try_get("resource").map_err(query_error)?,
        feature: row.try_get("feature").map_err(query_error)?,
        window_start: row.try_get("window_start").map_err(query_error)?,
        window_end: row.try_get("window_end").map_err(query_error)?,
        window_type,
        total_quantity: row.try_get("total_quantity").map_err(query_error)?,
        event_count: row.try_get("event_count").map_err(query_error)?,
        updated_at: row.try_get("updated_at").map_err(query_error)?,
    })
}

fn compute_error(e: sqlx::Error) -> AggregationError {
    AggregationError::ComputeFailed {
        message: e.to_string(),
    }
}

fn query_error(e: sqlx::Error) -> AggregationError {
    AggregationError::QueryFailed {
        message: e.to_string(),
    }
}
