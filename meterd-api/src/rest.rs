//! REST endpoints under `/v1/meter`

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use meterd_core::{NewEvent, Period};
use meterd_engine::{AggregateReport, PaginatedEvents, QuotaCheckRequest, QuotaDecision};
use meterd_storage::{AggregateFilters, EventFilters, Pagination};

use crate::error::ApiError;
use crate::ApiState;

/// Acknowledgement for single and batch ingest.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub events_processed: usize,
    pub event_ids: Vec<Uuid>,
}

/// Batch ingest request body.
#[derive(Debug, Deserialize)]
pub struct EventBatchRequest {
    pub events: Vec<NewEvent>,
}

/// Query string for the event listing.
#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub tenant_id: Option<String>,
    pub resource: Option<String>,
    pub feature: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

/// Query string for the aggregate listing.
#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    pub window_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub resource: Option<String>,
    pub feature: Option<String>,
    /// Accepted for wire compatibility; grouping is fixed at
    /// (tenant, resource, feature).
    #[allow(dead_code)]
    pub group_by: Option<String>,
}

/// Health probe response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub services: HashMap<String, String>,
}

pub async fn create_event(
    State(state): State<ApiState>,
    Json(event): Json<NewEvent>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let persisted = state.events.ingest(event).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "success".to_string(),
            events_processed: 1,
            event_ids: vec![persisted.id],
        }),
    ))
}

pub async fn create_events_batch(
    State(state): State<ApiState>,
    Json(batch): Json<EventBatchRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let persisted = state.events.ingest_batch(batch.events).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "success".to_string(),
            events_processed: persisted.len(),
            event_ids: persisted.iter().map(|event| event.id).collect(),
        }),
    ))
}

pub async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventListQuery>,
) -> Result<Json<PaginatedEvents>, ApiError> {
    let filters = EventFilters {
        tenant_id: query.tenant_id,
        resource: query.resource,
        feature: query.feature,
        start_date: query.start_date,
        end_date: query.end_date,
    };
    let pagination = Pagination {
        page: query.page,
        page_size: query.page_size,
    };

    let page = state.events.get_events(&filters, pagination).await?;
    Ok(Json(page))
}

pub async fn get_aggregates(
    State(state): State<ApiState>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<AggregateReport>, ApiError> {
    let window_type: Period = query
        .window_type
        .parse()
        .map_err(|_| invalid_window_type(&query.window_type))?;
    if !window_type.supports_rollup() {
        return Err(invalid_window_type(&query.window_type));
    }

    let filters = AggregateFilters {
        tenant_id: query.tenant_id,
        resource: query.resource,
        feature: query.feature,
        window_type,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    let report = state.aggregates.get_aggregates(&filters).await?;
    Ok(Json(report))
}

fn invalid_window_type(value: &str) -> ApiError {
    ApiError::Validation(format!(
        "window_type must be one of hourly, daily, monthly; got '{value}'"
    ))
}

pub async fn validate_quota(
    State(state): State<ApiState>,
    Json(request): Json<QuotaCheckRequest>,
) -> Result<Json<QuotaDecision>, ApiError> {
    let decision = state.quotas.validate(&request).await?;
    Ok(Json(decision))
}

/// Health probe: reports connectivity of the backing stores. Always 200;
/// degradation shows in the body.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let mut services = HashMap::new();

    services.insert(
        "database".to_string(),
        match state.storage.ping().await {
            Ok(()) => "connected".to_string(),
            Err(_) => "disconnected".to_string(),
        },
    );
    services.insert(
        "redis".to_string(),
        match state.cache.ping().await {
            Ok(()) => "connected".to_string(),
            Err(_) => "disconnected".to_string(),
        },
    );

    let status = if services.values().all(|s| s == "connected") {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        services,
    })
}

/// Service banner at `/`.
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Metering Service API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
