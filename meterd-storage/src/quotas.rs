//! Quota configuration persistence
//!
//! Quotas are administered out-of-band; the evaluator only reads them.
//! When several active rows match a lookup, the most specific wins: an
//! exact resource match beats a wildcard (`resource IS NULL`), remaining
//! ties resolve newest-first.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use meterd_core::errors::{QuotaError, QuotaResult};
use meterd_core::{NewQuota, Period, Quota};

/// Repository for quota configuration rows.
#[derive(Clone)]
pub struct QuotaRepository {
    pool: PgPool,
}

impl QuotaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the active quota for (tenant, feature), considering both
    /// resource-exact and wildcard rows when a resource is given.
    pub async fn find_active(
        &self,
        tenant_id: &str,
        feature: &str,
        resource: Option<&str>,
    ) -> QuotaResult<Option<Quota>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM metering_quotas
            WHERE tenant_id = $1
              AND feature = $2
              AND is_active = TRUE
              AND ($3::VARCHAR IS NULL OR resource IS NULL OR resource = $3)
            ORDER BY (resource IS NOT NULL) DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(feature)
        .bind(resource)
        .fetch_optional(&self.pool)
        .await
        .map_err(lookup_error)?;

        row.map(|r| row_to_quota(&r)).transpose()
    }

    /// Insert a quota row. Backs the operational/seeding surface; there is
    /// no HTTP endpoint for quota administration.
    pub async fn create(&self, quota: &NewQuota) -> QuotaResult<Quota> {
        let row = sqlx::query(
            r#"
            INSERT INTO metering_quotas
                (id, tenant_id, resource, feature, limit_value, period,
                 alert_threshold, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&quota.tenant_id)
        .bind(&quota.resource)
        .bind(&quota.feature)
        .bind(quota.limit_value)
        .bind(quota.period.as_str())
        .bind(quota.alert_threshold)
        .fetch_one(&self.pool)
        .await
        .map_err(lookup_error)?;

        row_to_quota(&row)
    }

    /// All active quotas for one tenant.
    pub async fn list_for_tenant(&self, tenant_id: &str) -> QuotaResult<Vec<Quota>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM metering_quotas
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(lookup_error)?;

        rows.iter().map(row_to_quota).collect()
    }
}

fn row_to_quota(row: &PgRow) -> QuotaResult<Quota> {
    let period: String = row.try_get("period").map_err(lookup_error)?;
    let period = period.parse::<Period>().map_err(|e| QuotaError::LookupFailed {
        message: format!("malformed period column: {e}"),
    })?;

    Ok(Quota {
        id: row.try_get("id").map_err(lookup_error)?,
        tenant_id: row.try_get("tenant_id").map_err(lookup_error)?,
        resource: row.try_get("resource").map_err(lookup_error)?,
        feature: row.try_get("feature").map_err(lookup_error)?,
        limit_value: row.try_get("limit_value").map_err(lookup_error)?,
        period,
        alert_threshold: row.try_get("alert_threshold").map_err(lookup_error)?,
        is_active: row.try_get("is_active").map_err(lookup_error)?,
        created_at: row.try_get("created_at").map_err(lookup_error)?,
        updated_at: row.try_get("updated_at").map_err(lookup_error)?,
    })
}

fn lookup_error(e: sqlx::Error) -> QuotaError {
    QuotaError::LookupFailed {
        message: e.to_string(),
    }
}
