//! # meterd API Gateway
//!
//! Axum REST surface for the metering service. All metering endpoints sit
//! under `/v1/meter` behind `X-API-Key` authentication; the health probe
//! and the root banner are open.
//!
//! | Method & path | Purpose |
//! |---|---|
//! | `POST /v1/meter/events` | ingest one event |
//! | `POST /v1/meter/events/batch` | ingest up to 1000 events atomically |
//! | `GET /v1/meter/events` | filtered, paginated event listing |
//! | `GET /v1/meter/aggregates` | rollup query with on-the-fly fallback |
//! | `POST /v1/meter/validate` | read-only quota check |
//! | `GET /v1/meter/health` | store connectivity probe |

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::future::Future;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use meterd_cache::CounterCache;
use meterd_core::ApiConfig;
use meterd_engine::{AggregationEngine, EventService, QuotaEvaluator};
use meterd_storage::{ApiKeyRepository, StoragePool};

pub mod auth;
pub mod error;
pub mod rest;

pub use error::ApiError;
pub use rest::{EventBatchRequest, HealthResponse, IngestResponse};

/// Shared handler state: the data-plane services plus the stores the
/// health probe touches directly.
#[derive(Clone)]
pub struct ApiState {
    pub events: EventService,
    pub aggregates: AggregationEngine,
    pub quotas: QuotaEvaluator,
    pub api_keys: ApiKeyRepository,
    pub storage: StoragePool,
    pub cache: CounterCache,
}

/// Build the service router.
pub fn router(state: ApiState, config: &ApiConfig) -> Router {
    let protected = Router::new()
        .route("/events", post(rest::create_event).get(rest::get_events))
        .route("/events/batch", post(rest::create_events_batch))
        .route("/aggregates", get(rest::get_aggregates))
        .route("/validate", post(rest::validate_quota))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let open = Router::new().route("/health", get(rest::health));

    Router::new()
        .nest("/v1/meter", protected.merge(open))
        .route("/", get(rest::root))
        .layer(cors_layer(config))
        .with_state(state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring malformed CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    config: &ApiConfig,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;

    info!("🌐 Metering API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server terminated abnormally")?;

    Ok(())
}
