//! Service registry implementation
//!
//! The registry keeps the canonical in-memory copy of every registered
//! service and writes through to the storage backend. A single
//! reader-writer lock guards the primary `id -> record` map and the
//! auxiliary `name -> ids` index, so readers always observe a record
//! either before or after a mutation, never partially updated.

use crate::error::GatewayError;
use crate::storage::ServiceStore;
use crate::types::{ServiceRecord, ServiceStatus};
use crate::GatewayResult;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Service registry with database write-through
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
    store: Arc<dyn ServiceStore>,
}

/// Both maps hold plain data: the primary map owns the records and the
/// name index refers to them by ID, in registration order.
#[derive(Default)]
struct RegistryInner {
    records: HashMap<String, ServiceRecord>,
    by_name: HashMap<String, Vec<String>>,
}

impl RegistryInner {
    fn insert(&mut self, record: ServiceRecord) {
        self.by_name
            .entry(record.name.clone())
            .or_default()
            .push(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }
}

impl ServiceRegistry {
    /// Create a new registry, warming the cache from storage.
    ///
    /// A load failure is logged but does not prevent startup; the registry
    /// simply starts empty.
    pub async fn new(store: Arc<dyn ServiceStore>) -> Self {
        let mut inner = RegistryInner::default();

        match store.load_all_services().await {
            Ok(records) => {
                let count = records.len();
                for record in records {
                    inner.insert(record);
                }
                if count > 0 {
                    info!("Loaded {} services from database", count);
                }
            }
            Err(e) => warn!("Failed to load services from database: {}", e),
        }

        Self {
            inner: RwLock::new(inner),
            store,
        }
    }

    /// Register a new service.
    ///
    /// Rejects a duplicate ID with `AlreadyRegistered` and a duplicate
    /// (name, host, port) triple with `DuplicateAddress`. A storage
    /// failure after the in-memory insert is logged as a warning; the
    /// in-memory state is kept so routing stays available.
    pub async fn register(&self, record: ServiceRecord) -> GatewayResult<ServiceRecord> {
        let mut inner = self.inner.write().await;

        if inner.records.contains_key(&record.id) {
            warn!("Service already registered: {}", record.id);
            return Err(GatewayError::AlreadyRegistered);
        }

        if inner.records.values().any(|existing| {
            existing.name == record.name
                && existing.host == record.host
                && existing.port == record.port
        }) {
            warn!(
                "Service with name '{}' already registered at {}:{}",
                record.name, record.host, record.port
            );
            return Err(GatewayError::DuplicateAddress);
        }

        inner.insert(record.clone());

        if let Err(e) = self.store.insert_service(&record).await {
            warn!("Failed to persist service to database: {}", e);
        }

        info!(
            "Service registered: {} ({}) at {}",
            record.name,
            record.id,
            record.base_url()
        );
        Ok(record)
    }

    /// Remove a service by ID from both maps and from storage.
    pub async fn deregister(&self, id: &str) -> GatewayResult<()> {
        let mut inner = self.inner.write().await;

        let record = match inner.records.remove(id) {
            Some(record) => record,
            None => {
                warn!("Service not found for deregistration: {}", id);
                return Err(GatewayError::NotFound);
            }
        };

        if let Some(ids) = inner.by_name.get_mut(&record.name) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                inner.by_name.remove(&record.name);
            }
        }

        if let Err(e) = self.store.delete_service(id).await {
            warn!("Failed to delete service from database: {}", e);
        }

        info!("Service deregistered: {} ({})", record.name, record.id);
        Ok(())
    }

    /// Look up a service by its unique ID.
    pub async fn get_by_id(&self, id: &str) -> GatewayResult<ServiceRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(id)
            .cloned()
            .ok_or(GatewayError::NotFound)
    }

    /// All instances registered under a logical name, in registration
    /// order. Fails with `NoInstances` when the name is unknown.
    pub async fn get_by_name(&self, name: &str) -> GatewayResult<Vec<ServiceRecord>> {
        let inner = self.inner.read().await;
        let instances = Self::resolve(&inner, name);
        if instances.is_empty() {
            return Err(GatewayError::NoInstances);
        }
        Ok(instances)
    }

    /// Healthy instances registered under a logical name; an empty result
    /// is not an error.
    pub async fn get_healthy(&self, name: &str) -> Vec<ServiceRecord> {
        let inner = self.inner.read().await;
        Self::resolve(&inner, name)
            .into_iter()
            .filter(|record| record.status == ServiceStatus::Healthy)
            .collect()
    }

    /// Snapshot of all registered services.
    pub async fn list(&self) -> Vec<ServiceRecord> {
        let inner = self.inner.read().await;
        inner.records.values().cloned().collect()
    }

    /// Update the health-tracking fields of a record and write through.
    ///
    /// Fails with `NotFound` when the record has been deregistered in the
    /// meantime; callers racing a deregistration must treat that as a
    /// no-op rather than resurrecting the record.
    pub async fn update_status(
        &self,
        id: &str,
        status: ServiceStatus,
        last_checked_at: DateTime<Utc>,
        failure_count: u32,
    ) -> GatewayResult<()> {
        let mut inner = self.inner.write().await;

        match inner.records.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.last_checked_at = last_checked_at;
                record.failure_count = failure_count;
            }
            None => {
                warn!("Service not found for status update: {}", id);
                return Err(GatewayError::NotFound);
            }
        }

        if let Err(e) = self
            .store
            .update_status(id, status, last_checked_at, failure_count)
            .await
        {
            warn!("Failed to update service status in database: {}", e);
        }

        Ok(())
    }

    fn resolve(inner: &RegistryInner, name: &str) -> Vec<ServiceRecord> {
        inner
            .by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use tempfile::TempDir;

    async fn new_registry(dir: &TempDir) -> ServiceRegistry {
        let store = SqliteStore::new(dir.path().join("portico.db")).await.unwrap();
        ServiceRegistry::new(Arc::new(store)).await
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        let record = ServiceRecord::new("api", "10.0.0.1", 8080, "/health");
        let id = record.id.clone();
        registry.register(record).await.unwrap();

        let got = registry.get_by_id(&id).await.unwrap();
        assert_eq!(got.name, "api");

        let by_name = registry.get_by_name("api").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, id);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        let record = ServiceRecord::new("api", "h", 1, "/h");
        let mut duplicate = ServiceRecord::new("other", "h2", 2, "/h");
        duplicate.id = record.id.clone();

        registry.register(record).await.unwrap();
        let err = registry.register(duplicate).await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_triple() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        registry
            .register(ServiceRecord::new("a", "h", 1, "/h"))
            .await
            .unwrap();

        // Same triple, different ID
        let err = registry
            .register(ServiceRecord::new("a", "h", 1, "/h"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateAddress));
        assert_eq!(registry.list().await.len(), 1);

        // Same name on a different host is allowed
        registry
            .register(ServiceRecord::new("a", "h2", 1, "/h"))
            .await
            .unwrap();
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_deregister_removes_from_both_indexes() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        let record = registry
            .register(ServiceRecord::new("api", "h", 1, "/h"))
            .await
            .unwrap();

        registry.deregister(&record.id).await.unwrap();
        assert!(matches!(
            registry.get_by_id(&record.id).await,
            Err(GatewayError::NotFound)
        ));
        assert!(matches!(
            registry.get_by_name("api").await,
            Err(GatewayError::NoInstances)
        ));
    }

    #[tokio::test]
    async fn test_deregister_unknown_service() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;
        assert!(matches!(
            registry.deregister("missing").await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_healthy_filters_by_status() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        let first = registry
            .register(ServiceRecord::new("api", "h1", 1, "/h"))
            .await
            .unwrap();
        let second = registry
            .register(ServiceRecord::new("api", "h2", 1, "/h"))
            .await
            .unwrap();

        registry
            .update_status(&first.id, ServiceStatus::Unhealthy, Utc::now(), 3)
            .await
            .unwrap();

        let healthy = registry.get_healthy("api").await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, second.id);

        // Draining instances are not routed to either
        registry
            .update_status(&second.id, ServiceStatus::Draining, Utc::now(), 0)
            .await
            .unwrap();
        assert!(registry.get_healthy("api").await.is_empty());

        // Unknown name yields an empty set, not an error
        assert!(registry.get_healthy("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_get_healthy_preserves_registration_order() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;

        let first = registry
            .register(ServiceRecord::new("api", "h1", 1, "/h"))
            .await
            .unwrap();
        registry
            .register(ServiceRecord::new("api", "h2", 1, "/h"))
            .await
            .unwrap();

        let healthy = registry.get_healthy("api").await;
        assert_eq!(healthy[0].id, first.id);
    }

    #[tokio::test]
    async fn test_update_status_unknown_service() {
        let dir = TempDir::new().unwrap();
        let registry = new_registry(&dir).await;
        let result = registry
            .update_status("missing", ServiceStatus::Healthy, Utc::now(), 0)
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound)));
    }

    #[tokio::test]
    async fn test_registry_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("portico.db");

        let registered = {
            let store = SqliteStore::new(&path).await.unwrap();
            let registry = ServiceRegistry::new(Arc::new(store)).await;
            registry
                .register(ServiceRecord::new("api", "h", 1, "/h"))
                .await
                .unwrap()
        };

        let store = SqliteStore::new(&path).await.unwrap();
        let registry = ServiceRegistry::new(Arc::new(store)).await;
        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, registered.id);

        registry.deregister(&registered.id).await.unwrap();

        let store = SqliteStore::new(&path).await.unwrap();
        let registry = ServiceRegistry::new(Arc::new(store)).await;
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_distinct_triples() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(new_registry(&dir).await);

        let mut join_set = tokio::task::JoinSet::new();
        for i in 0..16u16 {
            let registry = Arc::clone(&registry);
            join_set.spawn(async move {
                registry
                    .register(ServiceRecord::new("api", format!("host-{}", i), 8080, "/h"))
                    .await
            });
        }

        while let Some(result) = join_set.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(registry.list().await.len(), 16);
        assert_eq!(registry.get_by_name("api").await.unwrap().len(), 16);
    }
}
