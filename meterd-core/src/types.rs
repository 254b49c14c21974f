//! Domain types shared across the metering subsystems

use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{ValidationError, ValidationResult};
use crate::window::Period;

/// Free-form event annotations supplied by the emitter.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A usage event as accepted from an emitter, before persistence.
///
/// `timestamp` is optional; the server assigns the ingest instant when the
/// emitter omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub tenant_id: String,
    pub resource: String,
    pub feature: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_quantity() -> i64 {
    1
}

impl NewEvent {
    /// Validate field lengths and the positive-quantity invariant.
    /// Rejected events must leave no side effect anywhere downstream.
    pub fn validate(&self) -> ValidationResult<()> {
        check_length("tenant_id", &self.tenant_id)?;
        check_length("resource", &self.resource)?;
        check_length("feature", &self.feature)?;
        if self.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

fn check_length(field: &'static str, value: &str) -> ValidationResult<()> {
    if value.is_empty() || value.len() > 255 {
        return Err(ValidationError::FieldLength {
            field,
            length: value.len(),
        });
    }
    Ok(())
}

/// A persisted usage event. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub resource: String,
    pub feature: String,
    pub quantity: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// A rollup row over one window and one (tenant, resource, feature) tuple.
///
/// `window_end` carries the closed upper bound (window end minus 1µs), the
/// wire convention inherited by operators and downstream readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub tenant_id: String,
    pub resource: String,
    pub feature: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_type: Period,
    pub total_quantity: i64,
    pub event_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Configured usage limit for a tenant/feature, optionally scoped to one
/// resource (`resource = None` matches any resource).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub id: Uuid,
    pub tenant_id: String,
    pub resource: Option<String>,
    pub feature: String,
    pub limit_value: i64,
    pub period: Period,
    pub alert_threshold: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a quota row. Administration happens out-of-band;
/// this type backs the repository surface used by operators and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuota {
    pub tenant_id: String,
    pub resource: Option<String>,
    pub feature: String,
    pub limit_value: i64,
    pub period: Period,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: i32,
}

fn default_alert_threshold() -> i32 {
    80
}

impl NewQuota {
    pub fn validate(&self) -> ValidationResult<()> {
        check_length("tenant_id", &self.tenant_id)?;
        check_length("feature", &self.feature)?;
        if let Some(resource) = &self.resource {
            check_length("resource", resource)?;
        }
        if self.limit_value <= 0 {
            return Err(ValidationError::NonPositiveLimit {
                value: self.limit_value,
            });
        }
        if !(0..=100).contains(&self.alert_threshold) {
            return Err(ValidationError::AlertThreshold {
                value: self.alert_threshold,
            });
        }
        Ok(())
    }
}

/// Validation view of an API credential. Secrets are never stored in
/// cleartext; only the hex-encoded SHA-256 of the presented key is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: Uuid,
    pub key_hash: String,
    pub name: Option<String>,
    pub tenant_id: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Hex-encoded SHA-256 of a presented API key.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(quantity: i64) -> NewEvent {
        NewEvent {
            tenant_id: "t1".to_string(),
            resource: "billing".to_string(),
            feature: "invoice".to_string(),
            quantity,
            timestamp: None,
            metadata: None,
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(event(1).validate().is_ok());
        assert!(event(1_000_000).validate().is_ok());
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        assert!(matches!(
            event(0).validate(),
            Err(ValidationError::NonPositiveQuantity { quantity: 0 })
        ));
        assert!(event(-4).validate().is_err());
    }

    #[test]
    fn field_length_bounds_are_enforced() {
        let mut e = event(1);
        e.tenant_id = String::new();
        assert!(matches!(
            e.validate(),
            Err(ValidationError::FieldLength { field: "tenant_id", .. })
        ));

        let mut e = event(1);
        e.resource = "r".repeat(256);
        assert!(e.validate().is_err());

        let mut e = event(1);
        e.feature = "f".repeat(255);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn default_quantity_deserializes_to_one() {
        let e: NewEvent =
            serde_json::from_str(r#"{"tenant_id":"t","resource":"r","feature":"f"}"#).unwrap();
        assert_eq!(e.quantity, 1);
        assert!(e.timestamp.is_none());
    }

    #[test]
    fn api_key_hash_is_hex_sha256() {
        let hash = hash_api_key("test-key");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable across calls and distinct across inputs.
        assert_eq!(hash, hash_api_key("test-key"));
        assert_ne!(hash, hash_api_key("test-key2"));
    }

    #[test]
    fn quota_threshold_bounds_are_enforced() {
        let quota = NewQuota {
            tenant_id: "t1".to_string(),
            resource: None,
            feature: "f".to_string(),
            limit_value: 10,
            period: Period::Hourly,
            alert_threshold: 101,
        };
        assert!(quota.validate().is_err());
    }
}
