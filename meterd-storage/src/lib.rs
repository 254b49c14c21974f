//! # meterd Storage Layer
//!
//! Postgres persistence for the metering service. The durable store is
//! authoritative: an event only counts as ingested once its row commits,
//! and every derived answer (counters, rollups) must eventually agree with
//! what is recorded here.
//!
//! Repositories own their SQL and map rows by hand; the schema is created
//! on startup with idempotent `CREATE TABLE IF NOT EXISTS` statements.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

use meterd_core::DatabaseConfig;

pub mod aggregates;
pub mod api_keys;
pub mod events;
pub mod quotas;

pub use aggregates::{AggregateFilters, AggregateRepository};
pub use api_keys::ApiKeyRepository;
pub use events::{EventFilters, EventRepository, Pagination, UsageGroup};
pub use quotas::QuotaRepository;

/// Shared connection pool for the relational store.
///
/// Sized as `pool_size + max_overflow` with connections pre-pinged before
/// use, mirroring the service's pool configuration contract.
#[derive(Clone)]
pub struct StoragePool {
    pool: PgPool,
}

impl StoragePool {
    /// Connect to Postgres and build the pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size + config.max_overflow)
            .min_connections(config.pool_size.min(1))
            .test_before_acquire(true)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .context("failed to connect to Postgres")?;

        info!("📦 Connected event store ({} connections)", config.pool_size);
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the metering tables, constraints and indexes.
    pub async fn initialize_schema(&self) -> Result<()> {
        debug!("📦 Initializing metering database schema");

        // raw_sql: the schema is several statements, which prepared
        // statements do not allow.
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS metering_events (
                id UUID PRIMARY KEY,
                tenant_id VARCHAR(255) NOT NULL,
                resource VARCHAR(255) NOT NULL,
                feature VARCHAR(255) NOT NULL,
                quantity BIGINT NOT NULL DEFAULT 1,
                timestamp TIMESTAMPTZ NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT chk_quantity_positive CHECK (quantity > 0)
            );

            CREATE INDEX IF NOT EXISTS idx_metering_events_tenant
            ON metering_events(tenant_id);

            CREATE INDEX IF NOT EXISTS idx_metering_events_resource
            ON metering_events(resource);

            CREATE INDEX IF NOT EXISTS idx_metering_events_feature
            ON metering_events(feature);

            CREATE INDEX IF NOT EXISTS idx_metering_events_timestamp
            ON metering_events(timestamp);

            CREATE TABLE IF NOT EXISTS metering_aggregates (
                id UUID PRIMARY KEY,
                tenant_id VARCHAR(255) NOT NULL,
                resource VARCHAR(255) NOT NULL,
                feature VARCHAR(255) NOT NULL,
                window_start TIMESTAMPTZ NOT NULL,
                window_end TIMESTAMPTZ NOT NULL,
                window_type VARCHAR(20) NOT NULL,
                total_quantity BIGINT NOT NULL DEFAULT 0,
                event_count BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT uq_metering_aggregates_window
                    UNIQUE (tenant_id, resource, feature, window_type, window_start, window_end)
            );

            CREATE INDEX IF NOT EXISTS idx_metering_aggregates_tenant_window
            ON metering_aggregates(tenant_id, window_type, window_start);

            CREATE TABLE IF NOT EXISTS metering_quotas (
                id UUID PRIMARY KEY,
                tenant_id VARCHAR(255) NOT NULL,
                resource VARCHAR(255),
                feature VARCHAR(255) NOT NULL,
                limit_value BIGINT NOT NULL,
                period VARCHAR(20) NOT NULL,
                alert_threshold INTEGER NOT NULL DEFAULT 80,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT chk_limit_positive CHECK (limit_value > 0),
                CONSTRAINT chk_alert_threshold
                    CHECK (alert_threshold >= 0 AND alert_threshold <= 100)
            );

            CREATE INDEX IF NOT EXISTS idx_metering_quotas_tenant_feature
            ON metering_quotas(tenant_id, feature) WHERE is_active;

            CREATE TABLE IF NOT EXISTS metering_api_keys (
                id UUID PRIMARY KEY,
                key_hash VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(255),
                tenant_id VARCHAR(255),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_used_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ,
                metadata JSONB
            );

            CREATE INDEX IF NOT EXISTS idx_metering_api_keys_hash
            ON metering_api_keys(key_hash) WHERE is_active;
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to initialize metering schema")?;

        debug!("✅ Metering database schema initialized");
        Ok(())
    }

    /// Liveness probe for health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
