//! # meterd Core
//!
//! Shared foundation for the metering service: the time-window calculus
//! every subsystem keys off, the domain types (events, aggregates, quotas,
//! credentials), typed configuration and the error taxonomy.
//!
//! The crate is deliberately free of I/O: storage, cache and transport
//! concerns live in their own crates and depend on this one.

pub mod config;
pub mod errors;
pub mod types;
pub mod window;

pub use config::{AggregationConfig, ApiConfig, DatabaseConfig, MeterConfig, RedisConfig};
pub use errors::{
    AggregationError, AggregationResult, AuthError, AuthResult, CacheError, CacheResult,
    EventError, EventResult, MeterError, MeterResult, QuotaError, QuotaResult, ValidationError,
    ValidationResult,
};
pub use types::{
    hash_api_key, ApiCredential, Metadata, NewEvent, NewQuota, Quota, UsageAggregate, UsageEvent,
};
pub use window::{Period, TimeWindow};
