//! # meterd Engine
//!
//! The metering data plane: the three services that must keep the counter
//! cache, the durable event log and the computed rollups in eventual
//! agreement.
//!
//! - [`EventService`]: the ingest path. Counters first (best-effort),
//!   durable insert second (authoritative).
//! - [`AggregationEngine`]: folds raw events into idempotent rollup rows
//!   and answers aggregate queries, computing on the fly when a range has
//!   no rows yet. [`AggregationScheduler`] drives it on a timer.
//! - [`QuotaEvaluator`]: the read-only admission check. Hot counter,
//!   cold event-store fallback with write-back.

pub mod aggregation;
pub mod ingest;
pub mod quota;

pub use aggregation::{
    AggregateReport, AggregationEngine, AggregationScheduler, UsageSummary, MAX_COMPUTE_WINDOWS,
};
pub use ingest::{EventService, PaginatedEvents};
pub use quota::{QuotaCheckRequest, QuotaDecision, QuotaEvaluator, UNLIMITED_SENTINEL};
