//! Function instrumentation adapter
//!
//! Wraps a unit of work so that each invocation emits exactly one usage
//! event. There is no reflection over parameter names here: the tenant
//! comes from a fixed id, from an extractor over the function's argument,
//! or falls back to `"unknown"`, in that order. The wrapped function's
//! result is always returned untouched; metering failures stop at this
//! boundary.

use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use meterd_core::{Metadata, NewEvent};

use crate::client::MeterClient;

/// Maps the instrumented function's argument to a tenant id.
pub type TenantExtractor<A> = Arc<dyn Fn(&A) -> Option<String> + Send + Sync>;

/// Tenant id used when nothing resolves one.
pub const UNKNOWN_TENANT: &str = "unknown";

/// Static metering profile applied to every invocation of a wrapped
/// function.
#[derive(Clone)]
pub struct Metered<A> {
    client: MeterClient,
    resource: String,
    feature: String,
    quantity: i64,
    metadata: Option<Metadata>,
    tenant_id: Option<String>,
    extractor: Option<TenantExtractor<A>>,
}

impl<A> Metered<A> {
    pub fn new(client: MeterClient, resource: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            client,
            resource: resource.into(),
            feature: feature.into(),
            quantity: 1,
            metadata: None,
            tenant_id: None,
            extractor: None,
        }
    }

    /// Quantity emitted per invocation (default 1).
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Fixed tenant id; takes precedence over the extractor.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Static metadata attached to every emitted event.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Tenant extractor over the function argument, consulted when no
    /// fixed tenant id is configured.
    pub fn with_tenant_extractor(
        mut self,
        extractor: impl Fn(&A) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    fn resolve_tenant(&self, arg: &A) -> String {
        self.tenant_id
            .clone()
            .or_else(|| self.extractor.as_ref().and_then(|extract| extract(arg)))
            .unwrap_or_else(|| UNKNOWN_TENANT.to_string())
    }

    fn event(&self, tenant_id: String) -> NewEvent {
        NewEvent {
            tenant_id,
            resource: self.resource.clone(),
            feature: self.feature.clone(),
            quantity: self.quantity,
            timestamp: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Invoke an async function and emit one event for the invocation.
    pub async fn measure<T, F, Fut>(&self, arg: A, f: F) -> T
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = T>,
    {
        let tenant_id = self.resolve_tenant(&arg);
        let result = f(arg).await;

        if let Err(e) = self.client.record(self.event(tenant_id)).await {
            warn!(
                "metering failed for {}/{}: {}",
                self.resource, self.feature, e
            );
        }
        result
    }

    /// Invoke a synchronous function and emit one event for the
    /// invocation without blocking on the transport.
    pub fn measure_sync<T, F>(&self, arg: A, f: F) -> T
    where
        F: FnOnce(A) -> T,
    {
        let tenant_id = self.resolve_tenant(&arg);
        let result = f(arg);
        self.client.record_detached(self.event(tenant_id));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, TransportMode};

    fn client() -> MeterClient {
        // Async transport never spawns a worker at construction.
        MeterClient::new(ClientConfig {
            transport_mode: TransportMode::Async,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    struct OrderArgs {
        org: Option<String>,
    }

    #[tokio::test]
    async fn fixed_tenant_beats_extractor() {
        let metered = Metered::<OrderArgs>::new(client(), "billing", "invoice")
            .with_tenant("fixed-tenant")
            .with_tenant_extractor(|args: &OrderArgs| args.org.clone());
        let arg = OrderArgs {
            org: Some("extracted".to_string()),
        };
        assert_eq!(metered.resolve_tenant(&arg), "fixed-tenant");
    }

    #[tokio::test]
    async fn extractor_used_when_no_fixed_tenant() {
        let metered = Metered::<OrderArgs>::new(client(), "billing", "invoice")
            .with_tenant_extractor(|args: &OrderArgs| args.org.clone());

        let arg = OrderArgs {
            org: Some("acme".to_string()),
        };
        assert_eq!(metered.resolve_tenant(&arg), "acme");

        let arg = OrderArgs { org: None };
        assert_eq!(metered.resolve_tenant(&arg), "unknown");
    }

    #[tokio::test]
    async fn wrapped_result_is_returned_unchanged() {
        let metered = Metered::<i64>::new(client(), "math", "double");
        let result = metered.measure(21, |n| async move { n * 2 }).await;
        assert_eq!(result, 42);

        let result = metered.measure_sync(5, |n| n + 1);
        assert_eq!(result, 6);
    }
}
