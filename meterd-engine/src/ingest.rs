//! Event ingestion
//!
//! The write path of the metering data plane. Each accepted event touches
//! two stores: the hot-window counters (best-effort, drift is healed by
//! aggregation and bounded by counter TTLs) and the durable event log,
//! which is authoritative and whose failure fails the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use meterd_cache::CounterCache;
use meterd_core::errors::{MeterResult, ValidationError};
use meterd_core::{NewEvent, Period, UsageEvent};
use meterd_storage::{EventFilters, EventRepository, Pagination};

/// A page of events plus totals, as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedEvents {
    pub items: Vec<UsageEvent>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// Service for the event write and read paths.
#[derive(Clone)]
pub struct EventService {
    events: EventRepository,
    cache: CounterCache,
}

impl EventService {
    pub fn new(events: EventRepository, cache: CounterCache) -> Self {
        Self { events, cache }
    }

    /// Ingest a single event: validate, bump the hot-window counters for
    /// the common periods, then write the authoritative row.
    pub async fn ingest(&self, event: NewEvent) -> MeterResult<UsageEvent> {
        event.validate()?;
        let timestamp = event.timestamp.unwrap_or_else(Utc::now);

        self.bump_counters(&event, timestamp).await;

        let persisted = self.events.create(&event, timestamp).await?;
        debug!(
            "📊 ingested event {} for {}/{}/{} (+{})",
            persisted.id, persisted.tenant_id, persisted.resource, persisted.feature,
            persisted.quantity
        );
        Ok(persisted)
    }

    /// Ingest up to 1000 events in one transaction. Counters are bumped
    /// per event; the durable insert is all-or-nothing.
    pub async fn ingest_batch(&self, events: Vec<NewEvent>) -> MeterResult<Vec<UsageEvent>> {
        if events.is_empty() || events.len() > meterd_storage::events::MAX_BATCH_SIZE {
            return Err(ValidationError::BatchSize {
                size: events.len(),
            }
            .into());
        }
        for event in &events {
            event.validate()?;
        }

        let now = Utc::now();
        let stamped: Vec<(NewEvent, DateTime<Utc>)> = events
            .into_iter()
            .map(|event| {
                let ts = event.timestamp.unwrap_or(now);
                (event, ts)
            })
            .collect();

        for (event, ts) in &stamped {
            self.bump_counters(event, *ts).await;
        }

        let persisted = self.events.create_batch(&stamped).await?;
        debug!("📊 ingested batch of {} events", persisted.len());
        Ok(persisted)
    }

    /// Filtered, paginated listing.
    pub async fn get_events(
        &self,
        filters: &EventFilters,
        pagination: Pagination,
    ) -> MeterResult<PaginatedEvents> {
        pagination.validate()?;
        let (items, total) = self.events.get_all(filters, pagination).await?;
        let page_size = i64::from(pagination.page_size);
        let total_pages = (total + page_size - 1) / page_size;

        Ok(PaginatedEvents {
            items,
            page: pagination.page,
            page_size: pagination.page_size,
            total,
            total_pages,
        })
    }

    /// Increment the counters for every hot period. Counter failures never
    /// fail ingest; they degrade the fast path and page an operator via
    /// the warning log.
    async fn bump_counters(&self, event: &NewEvent, timestamp: DateTime<Utc>) {
        for period in Period::COUNTER_PERIODS {
            if let Err(e) = self
                .cache
                .increment_counter(
                    &event.tenant_id,
                    &event.resource,
                    &event.feature,
                    period,
                    timestamp,
                    event.quantity,
                )
                .await
            {
                warn!(
                    "⚠️ counter increment failed for {}/{}/{} ({}): {}",
                    event.tenant_id, event.resource, event.feature, period, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        // Mirrors the arithmetic in get_events.
        let cases = [(0i64, 50i64, 0i64), (1, 50, 1), (50, 50, 1), (51, 50, 2), (101, 50, 3)];
        for (total, page_size, expected) in cases {
            assert_eq!((total + page_size - 1) / page_size, expected);
        }
    }
}
