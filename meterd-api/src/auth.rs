//! API key authentication middleware
//!
//! Every metering endpoint except the health probe requires an `X-API-Key`
//! header. The presented secret is hashed (hex SHA-256) and looked up
//! against active, unexpired credentials; a validated request stamps the
//! credential's `last_used_at`. Rejections carry no side effects.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use meterd_core::hash_api_key;

use crate::error::ApiError;
use crate::ApiState;

pub async fn require_api_key(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let Some(presented) = presented else {
        return Err(ApiError::Unauthorized("API key is required".to_string()));
    };

    let key_hash = hash_api_key(presented);
    let credential = state
        .api_keys
        .find_active_by_hash(&key_hash)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let Some(credential) = credential else {
        return Err(ApiError::Unauthorized("Invalid API key".to_string()));
    };

    // Usage stamping is best-effort; an authenticated request proceeds
    // even if the stamp write fails.
    if let Err(e) = state.api_keys.touch_last_used(credential.id).await {
        warn!("failed to stamp last_used_at for credential {}: {}", credential.id, e);
    }

    debug!("authenticated API key {}", credential.id);
    Ok(next.run(request).await)
}
