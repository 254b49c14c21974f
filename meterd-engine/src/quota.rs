//! Quota evaluation
//!
//! Answers "is this action within the configured quota?" without consuming
//! anything. Consumption happens on ingest; a race between validate and
//! ingest is accepted. Usage reads prefer the hot counter;
//! a miss (absent key, not zero) falls back to summing the event log and
//! warms the counter for subsequent calls.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use meterd_cache::CounterCache;
use meterd_core::errors::{MeterResult, ValidationError};
use meterd_core::{Period, TimeWindow};
use meterd_storage::{EventRepository, QuotaRepository};

/// Sentinel limit returned when no quota is configured. Part of the wire
/// contract; clients compare against it, so it never changes.
pub const UNLIMITED_SENTINEL: i64 = 999_999;

/// A candidate consumption to check against the configured quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCheckRequest {
    pub tenant_id: String,
    pub resource: String,
    pub feature: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub period: Period,
}

fn default_quantity() -> i64 {
    1
}

impl QuotaCheckRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                quantity: self.quantity,
            });
        }
        Ok(())
    }
}

/// The evaluator's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
    pub period: Period,
    pub reset_at: chrono::DateTime<Utc>,
    pub current_usage: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Read-only quota evaluator.
#[derive(Clone)]
pub struct QuotaEvaluator {
    quotas: QuotaRepository,
    events: EventRepository,
    cache: CounterCache,
}

impl QuotaEvaluator {
    pub fn new(quotas: QuotaRepository, events: EventRepository, cache: CounterCache) -> Self {
        Self {
            quotas,
            events,
            cache,
        }
    }

    /// Evaluate a candidate consumption. When a quota is configured, its
    /// own period takes precedence over the period declared on the
    /// request; the declared period is only echoed back in the
    /// no-quota case.
    pub async fn validate(&self, request: &QuotaCheckRequest) -> MeterResult<QuotaDecision> {
        request.validate()?;

        let quota = self
            .quotas
            .find_active(
                &request.tenant_id,
                &request.feature,
                Some(&request.resource),
            )
            .await?;

        let now = Utc::now();

        let Some(quota) = quota else {
            return Ok(QuotaDecision {
                allowed: true,
                remaining: UNLIMITED_SENTINEL,
                limit: UNLIMITED_SENTINEL,
                period: request.period,
                reset_at: TimeWindow::containing(now, request.period).inclusive_end(),
                current_usage: 0,
                message: Some("No quota configured".to_string()),
            });
        };

        let current_usage = self
            .current_usage(
                &request.tenant_id,
                &request.resource,
                &request.feature,
                quota.period,
            )
            .await?;

        let remaining = (quota.limit_value - current_usage).max(0);
        let allowed = remaining >= request.quantity;
        let reset_at = TimeWindow::containing(now, quota.period).inclusive_end();

        let message = if allowed {
            None
        } else {
            Some(format!(
                "Quota exceeded for feature '{}'. Current usage: {}/{}",
                request.feature, current_usage, quota.limit_value
            ))
        };

        debug!(
            "📊 quota check {}/{}/{}: usage {}/{} -> allowed={}",
            request.tenant_id, request.resource, request.feature,
            current_usage, quota.limit_value, allowed
        );

        Ok(QuotaDecision {
            allowed,
            remaining,
            limit: quota.limit_value,
            period: quota.period,
            reset_at,
            current_usage,
            message,
        })
    }

    /// Current-window usage: counter first, event-store sum on a miss.
    /// A positive cold-path result is written back with the period TTL so
    /// the next check is hot.
    async fn current_usage(
        &self,
        tenant_id: &str,
        resource: &str,
        feature: &str,
        period: Period,
    ) -> MeterResult<i64> {
        let now = Utc::now();

        match self
            .cache
            .get_counter(tenant_id, resource, feature, period, now)
            .await
        {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                // Cache outage degrades to the durable store, never to an error.
                warn!("⚠️ counter read failed, computing usage from event store: {}", e);
            }
        }

        let window = TimeWindow::containing(now, period);
        let usage = self
            .events
            .get_usage_summary(
                tenant_id,
                Some(resource),
                Some(feature),
                window.start,
                window.end,
            )
            .await?;

        if usage > 0 {
            if let Err(e) = self
                .cache
                .set_counter(tenant_id, resource, feature, period, now, usage)
                .await
            {
                debug!("counter warm-back failed: {}", e);
            }
        }

        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_goes_negative() {
        // Mirrors the clamp in validate().
        let limit: i64 = 10;
        let usage: i64 = 14;
        assert_eq!((limit - usage).max(0), 0);
    }

    #[test]
    fn allow_deny_boundary() {
        // remaining >= quantity is the admission predicate.
        let cases = [
            (10i64, 8i64, 2i64, true),  // exactly fits
            (10, 8, 3, false),          // one over
            (10, 11, 1, false),         // already exceeded
            (10, 0, 10, true),          // full budget
        ];
        for (limit, usage, quantity, expected) in cases {
            let remaining = (limit - usage).max(0);
            assert_eq!(remaining >= quantity, expected, "limit={limit} usage={usage} q={quantity}");
        }
    }

    #[test]
    fn deny_message_format() {
        let message = format!(
            "Quota exceeded for feature '{}'. Current usage: {}/{}",
            "f", 11, 10
        );
        assert_eq!(message, "Quota exceeded for feature 'f'. Current usage: 11/10");
    }

    #[test]
    fn zero_quantity_request_is_rejected() {
        let request = QuotaCheckRequest {
            tenant_id: "t".into(),
            resource: "r".into(),
            feature: "f".into(),
            quantity: 0,
            period: Period::Hourly,
        };
        assert!(request.validate().is_err());
    }
}
