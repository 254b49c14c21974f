//! API credential persistence (validation view)
//!
//! Only the hex-encoded SHA-256 of a key is ever stored. Issuance and the
//! admin surface live elsewhere; this repository answers "is this
//! presented key authorized?" and stamps `last_used_at`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use meterd_core::errors::{AuthError, AuthResult};
use meterd_core::ApiCredential;

/// Repository for API credentials.
#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up an active, unexpired credential by key hash.
    pub async fn find_active_by_hash(&self, key_hash: &str) -> AuthResult<Option<ApiCredential>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM metering_api_keys
            WHERE key_hash = $1
              AND is_active = TRUE
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(lookup_error)?;

        row.map(|r| row_to_credential(&r)).transpose()
    }

    /// Stamp `last_used_at` for a validated credential.
    pub async fn touch_last_used(&self, id: Uuid) -> AuthResult<()> {
        sqlx::query("UPDATE metering_api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(lookup_error)?;
        Ok(())
    }

    /// Insert a credential row from a precomputed hash. Used by seeding
    /// and tests; key issuance itself is out of scope.
    pub async fn create(
        &self,
        key_hash: &str,
        name: Option<&str>,
        tenant_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthResult<ApiCredential> {
        let row = sqlx::query(
            r#"
            INSERT INTO metering_api_keys
                (id, key_hash, name, tenant_id, is_active, created_at, expires_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW(), $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key_hash)
        .bind(name)
        .bind(tenant_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(lookup_error)?;

        row_to_credential(&row)
    }
}

fn row_to_credential(row: &PgRow) -> AuthResult<ApiCredential> {
    Ok(ApiCredential {
        id: row.try_get("id").map_err(lookup_error)?,
        key_hash: row.try_get("key_hash").map_err(lookup_error)?,
        name: row.try_get("name").map_err(lookup_error)?,
        tenant_id: row.try_get("tenant_id").map_err(lookup_error)?,
        is_active: row.try_get("is_active").map_err(lookup_error)?,
        last_used_at: row.try_get("last_used_at").map_err(lookup_error)?,
        created_at: row.try_get("created_at").map_err(lookup_error)?,
        expires_at: row.try_get("expires_at").map_err(lookup_error)?,
    })
}

fn lookup_error(e: sqlx::Error) -> AuthError {
    AuthError::LookupFailed {
        message: e.to_string(),
    }
}
