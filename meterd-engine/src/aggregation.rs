//! Rollup aggregation
//!
//! Folds raw events into per-window aggregate rows. The computation is
//! absolute: each run recomputes a window's totals from the event log and
//! overwrites the row, which makes it idempotent and self-healing. A
//! window damaged by any earlier race is repaired on the next pass.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use meterd_cache::CounterCache;
use meterd_core::errors::{MeterResult, ValidationError};
use meterd_core::{AggregationConfig, Period, TimeWindow, UsageAggregate};
use meterd_storage::{AggregateFilters, AggregateRepository, EventRepository};

/// Upper bound on windows per computation: one month of hourly windows.
/// Keeps the compute-on-the-fly fallback bounded for arbitrary ranges.
pub const MAX_COMPUTE_WINDOWS: usize = 744;

/// Totals over a returned aggregate set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_quantity: i64,
    pub total_events: i64,
}

/// Aggregate query result: the rows plus their summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub aggregates: Vec<UsageAggregate>,
    pub summary: UsageSummary,
}

/// The aggregation engine: computes rollups and answers aggregate queries.
#[derive(Clone)]
pub struct AggregationEngine {
    events: EventRepository,
    aggregates: AggregateRepository,
    cache: CounterCache,
}

impl AggregationEngine {
    pub fn new(
        events: EventRepository,
        aggregates: AggregateRepository,
        cache: CounterCache,
    ) -> Self {
        Self {
            events,
            aggregates,
            cache,
        }
    }

    /// Compute aggregates for every window of `window_type` overlapping
    /// `[from, to)`, in order. Each window is grouped by
    /// (tenant, resource, feature), upserted absolutely, and published to
    /// the aggregate cache.
    pub async fn compute(
        &self,
        window_type: Period,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MeterResult<Vec<UsageAggregate>> {
        if !window_type.supports_rollup() {
            return Err(ValidationError::UnsupportedWindowType {
                value: window_type.to_string(),
            }
            .into());
        }

        let mut computed = Vec::new();
        let mut cursor = from;
        let mut windows = 0usize;

        while cursor < to {
            if windows >= MAX_COMPUTE_WINDOWS {
                warn!(
                    "🔄 aggregation capped at {} {} windows; range {} .. {} left uncomputed",
                    MAX_COMPUTE_WINDOWS, window_type, cursor, to
                );
                break;
            }

            let window = TimeWindow::containing(cursor, window_type);
            let groups = self.events.group_usage(window.start, window.end).await?;

            for group in groups {
                let aggregate = self
                    .aggregates
                    .upsert(
                        &group.tenant_id,
                        &group.resource,
                        &group.feature,
                        window_type,
                        window.start,
                        window.inclusive_end(),
                        group.total_quantity,
                        group.event_count,
                    )
                    .await?;

                if let Err(e) = self
                    .cache
                    .set_aggregate(
                        &aggregate.tenant_id,
                        &aggregate.resource,
                        &aggregate.feature,
                        window_type,
                        aggregate.window_start,
                        aggregate.total_quantity,
                        aggregate.event_count,
                    )
                    .await
                {
                    debug!("aggregate cache publish failed: {}", e);
                }

                computed.push(aggregate);
            }

            // The next window begins exactly where this one ends.
            cursor = window.end;
            windows += 1;
        }

        debug!(
            "🔄 computed {} aggregates across {} {} windows",
            computed.len(),
            windows,
            window_type
        );
        Ok(computed)
    }

    /// Answer an aggregate query from the rollup store, computing on the
    /// fly when no rows exist yet for the range.
    pub async fn get_aggregates(&self, filters: &AggregateFilters) -> MeterResult<AggregateReport> {
        let mut rows = self.aggregates.get_aggregates(filters).await?;

        if rows.is_empty() {
            let computed = self
                .compute(filters.window_type, filters.start_date, filters.end_date)
                .await?;
            rows = computed
                .into_iter()
                .filter(|a| {
                    filters
                        .tenant_id
                        .as_ref()
                        .map_or(true, |t| &a.tenant_id == t)
                        && filters.resource.as_ref().map_or(true, |r| &a.resource == r)
                        && filters.feature.as_ref().map_or(true, |f| &a.feature == f)
                })
                .collect();
        }

        let summary = UsageSummary {
            total_quantity: rows.iter().map(|a| a.total_quantity).sum(),
            total_events: rows.iter().map(|a| a.event_count).sum(),
        };

        Ok(AggregateReport {
            aggregates: rows,
            summary,
        })
    }
}

/// Timer-driven aggregation.
///
/// Recomputes the previous and current windows for each rollup period on
/// every tick, so the stored rollups lag live ingestion by at most one
/// interval and just-closed windows get a final, settled pass.
pub struct AggregationScheduler {
    engine: Arc<AggregationEngine>,
    config: AggregationConfig,
    is_running: Arc<AtomicBool>,
    handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl AggregationScheduler {
    pub fn new(engine: Arc<AggregationEngine>, config: AggregationConfig) -> Self {
        Self {
            engine,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            handle: RwLock::new(None),
        }
    }

    /// Start the scheduler loop.
    pub async fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("aggregation scheduler already running");
            return;
        }

        info!(
            "🔄 Starting aggregation scheduler (every {}s)",
            self.config.interval_seconds
        );

        let engine = Arc::clone(&self.engine);
        let is_running = Arc::clone(&self.is_running);
        let tick = std::time::Duration::from_secs(self.config.interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut interval = interval(tick);
            // The first tick fires immediately; skip it so ingestion has a
            // full interval before the first recomputation.
            interval.tick().await;

            while is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !is_running.load(Ordering::SeqCst) {
                    break;
                }
                Self::run_once(&engine).await;
            }
        });

        *self.handle.write().await = Some(handle);
    }

    /// One scheduler pass over every rollup period.
    async fn run_once(engine: &AggregationEngine) {
        let now = Utc::now();
        for window_type in [Period::Hourly, Period::Daily, Period::Monthly] {
            let current = TimeWindow::containing(now, window_type);
            let previous = TimeWindow::containing(
                current.start - Duration::microseconds(1),
                window_type,
            );

            match engine.compute(window_type, previous.start, now).await {
                Ok(aggregates) => {
                    debug!(
                        "🔄 scheduler refreshed {} {} aggregates",
                        aggregates.len(),
                        window_type
                    );
                }
                Err(e) => {
                    error!("❌ scheduled {} aggregation failed: {}", window_type, e);
                }
            }
        }
    }

    /// Stop the scheduler and reap its task.
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.write().await.take() {
            handle.abort();
        }
        info!("🛑 Aggregation scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_sums_rows() {
        let row = |q: i64, c: i64| UsageAggregate {
            tenant_id: "t".into(),
            resource: "r".into(),
            feature: "f".into(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            window_type: Period::Hourly,
            total_quantity: q,
            event_count: c,
            updated_at: Utc::now(),
        };
        let rows = vec![row(3, 2), row(5, 1)];
        let summary = UsageSummary {
            total_quantity: rows.iter().map(|a| a.total_quantity).sum(),
            total_events: rows.iter().map(|a| a.event_count).sum(),
        };
        assert_eq!(summary.total_quantity, 8);
        assert_eq!(summary.total_events, 3);
    }

    #[test]
    fn window_cursor_advances_without_microsecond_steps() {
        // Walking a day of hourly windows takes exactly 24 steps.
        let from: DateTime<Utc> = "2025-03-10T00:00:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2025-03-11T00:00:00Z".parse().unwrap();
        let mut cursor = from;
        let mut windows = 0;
        while cursor < to {
            let w = TimeWindow::containing(cursor, Period::Hourly);
            cursor = w.end;
            windows += 1;
        }
        assert_eq!(windows, 24);
        assert_eq!(cursor, to);
    }

    #[test]
    fn monthly_cursor_jumps_whole_months() {
        let from: DateTime<Utc> = "2025-01-15T12:00:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2025-04-01T00:00:00Z".parse().unwrap();
        let mut cursor = from;
        let mut starts = Vec::new();
        while cursor < to {
            let w = TimeWindow::containing(cursor, Period::Monthly);
            starts.push(w.start.to_rfc3339());
            cursor = w.end;
        }
        assert_eq!(
            starts,
            vec![
                "2025-01-01T00:00:00+00:00",
                "2025-02-01T00:00:00+00:00",
                "2025-03-01T00:00:00+00:00",
            ]
        );
    }
}
