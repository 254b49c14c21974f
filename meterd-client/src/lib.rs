//! # meterd Client
//!
//! Embeddable emitter for applications metered by the meterd service.
//! Instrumented code keeps working when the service is down: events are
//! buffered in a bounded local queue and a metering failure never
//! propagates out of the instrumented unit of work.
//!
//! Three transports, chosen per process via [`ClientConfig`]:
//! `sync` (await each POST, retry with backoff), `async` (fire-and-forget)
//! and `batch` (background worker drains the buffer on a timer).
//!
//! # Example
//! ```ignore
//! use meterd_client::{ClientConfig, Metered, MeterClient};
//!
//! let client = MeterClient::new(ClientConfig::from_env()?)?;
//! let metered = Metered::new(client, "billing", "invoice_generate")
//!     .with_tenant_extractor(|order: &Order| Some(order.tenant_id.clone()));
//!
//! let invoice = metered.measure(order, generate_invoice).await;
//! ```

pub mod adapter;
pub mod client;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod queue;

pub use adapter::{Metered, TenantExtractor, UNKNOWN_TENANT};
pub use client::MeterClient;
pub use config::{ClientConfig, TransportMode};
pub use errors::{ClientError, ClientResult};
pub use middleware::{track_requests, EXCLUDED_PATHS};
pub use queue::EventQueue;

pub use meterd_core::NewEvent;
