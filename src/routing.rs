//! Routing of requests to registered services
//!
//! The resolver maps a logical service name to a healthy instance and hands
//! the request to the proxy engine. Instance selection is behind a small
//! strategy trait; the only shipped strategy picks the first healthy
//! instance in registration order.

use crate::error::GatewayError;
use crate::proxy::{build_target_url, ProxyEngine};
use crate::registry::ServiceRegistry;
use crate::types::ServiceRecord;
use crate::GatewayResult;
use axum::body::Body;
use axum::extract::Request;
use axum::http::Response;
use std::sync::Arc;
use tracing::{debug, warn};

/// Instance selection capability
pub trait SelectionStrategy: Send + Sync {
    /// Pick one instance out of the healthy set, or `None` when empty.
    fn select<'a>(&self, healthy: &'a [ServiceRecord]) -> Option<&'a ServiceRecord>;
}

/// Selects the first healthy instance in registration order
pub struct FirstHealthy;

impl SelectionStrategy for FirstHealthy {
    fn select<'a>(&self, healthy: &'a [ServiceRecord]) -> Option<&'a ServiceRecord> {
        healthy.first()
    }
}

/// Routing service resolving names to healthy instances
pub struct RoutingService {
    registry: Arc<ServiceRegistry>,
    proxy: Arc<ProxyEngine>,
    strategy: Box<dyn SelectionStrategy>,
}

impl RoutingService {
    /// Create a routing service with the default first-healthy strategy.
    pub fn new(registry: Arc<ServiceRegistry>, proxy: Arc<ProxyEngine>) -> Self {
        Self::with_strategy(registry, proxy, Box::new(FirstHealthy))
    }

    /// Create a routing service with a custom selection strategy.
    pub fn with_strategy(
        registry: Arc<ServiceRegistry>,
        proxy: Arc<ProxyEngine>,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            registry,
            proxy,
            strategy,
        }
    }

    /// Route a request to a registered service by name, appending `path`
    /// to the chosen instance's base URL.
    pub async fn route_to_service(
        &self,
        request: Request,
        name: &str,
        path: &str,
    ) -> GatewayResult<Response<Body>> {
        debug!("Routing request to service '{}' with path '{}'", name, path);

        let healthy = self.registry.get_healthy(name).await;
        let target = match self.strategy.select(&healthy) {
            Some(target) => target,
            None => {
                warn!("No healthy instances found for service: {}", name);
                return Err(GatewayError::BackendUnavailable);
            }
        };

        let target_url = build_target_url(&target.base_url(), path, "");
        self.proxy.forward(request, &target_url, None).await
    }
}
