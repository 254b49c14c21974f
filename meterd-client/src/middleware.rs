//! Axum middleware for automatic request metering
//!
//! Layered onto an application router, emits one event per successfully
//! handled request: the route path becomes the resource, the lowercased
//! method the feature. Operational paths are excluded, and a metering
//! failure never affects the response.

use axum::extract::{RawPathParams, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use meterd_core::NewEvent;

use crate::client::MeterClient;

/// Paths never metered.
pub const EXCLUDED_PATHS: [&str; 4] = ["/health", "/docs", "/redoc", "/openapi.json"];

/// Middleware entry point for `axum::middleware::from_fn_with_state`.
pub async fn track_requests(
    State(client): State<MeterClient>,
    params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if EXCLUDED_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let tenant_id = resolve_tenant(request.headers(), params.as_ref(), request.uri().query());
    let feature = request.method().as_str().to_lowercase();
    let resource = resource_from_path(&path);

    let response = next.run(request).await;

    if response.status().as_u16() < 400 {
        let event = NewEvent {
            tenant_id,
            resource,
            feature,
            quantity: 1,
            timestamp: None,
            metadata: None,
        };
        if let Err(e) = client.record(event).await {
            debug!("request metering failed: {}", e);
        }
    }

    response
}

/// Tenant resolution order: `X-Tenant-ID` header, `tenant_id` path
/// parameter, `tenant_id` query parameter, `"unknown"`.
pub(crate) fn resolve_tenant(
    headers: &HeaderMap,
    params: Option<&RawPathParams>,
    query: Option<&str>,
) -> String {
    if let Some(value) = headers.get("X-Tenant-ID").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return value.to_string();
        }
    }

    if let Some(params) = params {
        for (name, value) in params.iter() {
            if name == "tenant_id" {
                return value.to_string();
            }
        }
    }

    if let Some(value) = query.and_then(|q| query_param(q, "tenant_id")) {
        return value;
    }

    "unknown".to_string()
}

/// Route path to resource name: strip surrounding slashes, join segments
/// with dots; the bare root maps to `"api"`.
pub(crate) fn resource_from_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "api".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn path_maps_to_dotted_resource() {
        assert_eq!(resource_from_path("/api/v1/orders"), "api.v1.orders");
        assert_eq!(resource_from_path("/orders/"), "orders");
        assert_eq!(resource_from_path("/"), "api");
        assert_eq!(resource_from_path(""), "api");
    }

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Tenant-ID", HeaderValue::from_static("from-header"));
        let tenant = resolve_tenant(&headers, None, Some("tenant_id=from-query"));
        assert_eq!(tenant, "from-header");
    }

    #[test]
    fn query_param_is_last_resort_before_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_tenant(&headers, None, Some("a=b&tenant_id=t-42")),
            "t-42"
        );
        assert_eq!(resolve_tenant(&headers, None, Some("a=b")), "unknown");
        assert_eq!(resolve_tenant(&headers, None, None), "unknown");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", HeaderValue::from_static("lower"));
        assert_eq!(resolve_tenant(&headers, None, None), "lower");
    }
}
