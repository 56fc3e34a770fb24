//! Health check audit log
//!
//! Append-only record of probe outcomes. Writes are best-effort: a storage
//! failure is logged but never propagated, so a flaky database cannot stall
//! the health checker.

use crate::storage::ServiceStore;
use crate::types::{HealthCheckEntry, ProbeStatus};
use crate::GatewayResult;
use std::sync::Arc;
use tracing::warn;

/// Audit log over the storage backend
pub struct AuditLog {
    store: Arc<dyn ServiceStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        Self { store }
    }

    /// Append one probe outcome.
    pub async fn record(
        &self,
        service_id: &str,
        status: ProbeStatus,
        error_message: Option<&str>,
        response_body: Option<&str>,
        response_time_ms: i64,
    ) {
        if let Err(e) = self
            .store
            .insert_log(
                service_id,
                status,
                error_message,
                response_body,
                response_time_ms,
            )
            .await
        {
            warn!(
                "Failed to log health check for service {}: {}",
                service_id, e
            );
        }
    }

    /// Most recent entries for a service, newest first.
    pub async fn recent(
        &self,
        service_id: &str,
        limit: u32,
    ) -> GatewayResult<Vec<HealthCheckEntry>> {
        self.store.select_logs(service_id, limit).await
    }
}
