//! Storage backends for the service registry
//!
//! This module provides the persistence abstraction for service records and
//! health check logs, plus the SQLite implementation used in production.

use crate::types::{HealthCheckEntry, ProbeStatus, ServiceRecord, ServiceStatus};
use crate::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Storage backend trait for the service registry and the audit log
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Load every persisted service record; used once at startup to warm
    /// the registry cache.
    async fn load_all_services(&self) -> GatewayResult<Vec<ServiceRecord>>;

    /// Persist a new service record. Fails on a uniqueness violation.
    async fn insert_service(&self, record: &ServiceRecord) -> GatewayResult<()>;

    /// Delete a service record; health check logs cascade.
    async fn delete_service(&self, id: &str) -> GatewayResult<()>;

    /// Update the health-tracking fields of a service record.
    async fn update_status(
        &self,
        id: &str,
        status: ServiceStatus,
        last_checked_at: DateTime<Utc>,
        failure_count: u32,
    ) -> GatewayResult<()>;

    /// Append one health check log entry.
    async fn insert_log(
        &self,
        service_id: &str,
        status: ProbeStatus,
        error_message: Option<&str>,
        response_body: Option<&str>,
        response_time_ms: i64,
    ) -> GatewayResult<()>;

    /// Fetch health check log entries for a service, newest first.
    async fn select_logs(
        &self,
        service_id: &str,
        limit: u32,
    ) -> GatewayResult<Vec<HealthCheckEntry>>;

    /// Shut down the storage backend.
    async fn shutdown(&self) -> GatewayResult<()>;
}
