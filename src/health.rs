//! Periodic health checking of registered services
//!
//! The checker runs as a background task. On every tick it snapshots the
//! registry and launches one probe task per service, so a slow backend
//! never delays the probes of the others or the next tick. Every completed
//! probe appends exactly one audit log entry.

use crate::audit::AuditLog;
use crate::config::HealthCheckConfig;
use crate::error::GatewayError;
use crate::registry::ServiceRegistry;
use crate::types::{ProbeStatus, ServiceRecord};
use crate::{GatewayResult, RESPONSE_BODY_CAP};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Health checker for registered services
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    audit: Arc<AuditLog>,
    client: reqwest::Client,
    config: HealthCheckConfig,
    task_handle: RwLock<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        audit: Arc<AuditLog>,
        config: HealthCheckConfig,
    ) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            audit,
            client,
            config,
            task_handle: RwLock::new(None),
        })
    }

    /// Start periodic checking in a background task.
    pub async fn start(self: Arc<Self>) {
        let mut handle = self.task_handle.write().await;
        if handle.is_some() {
            warn!("Health checker is already running");
            return;
        }

        info!(
            "Starting health checker: interval={:?}, timeout={:?}, threshold={}",
            self.config.interval, self.config.timeout, self.config.failure_threshold
        );

        let checker = Arc::clone(&self);
        *handle = Some(tokio::spawn(async move {
            checker.run().await;
        }));
    }

    /// Stop the checker. Safe to call multiple times.
    pub async fn stop(&self) {
        let mut handle = self.task_handle.write().await;
        if let Some(handle) = handle.take() {
            handle.abort();
            info!("Health checker stopped");
        }
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        // The first tick completes immediately; wait a full period before
        // the first round of probes.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Probe every registered service, one task per record.
    async fn check_all(self: &Arc<Self>) {
        let records = self.registry.list().await;
        debug!("Running health checks for {} services", records.len());

        for record in records {
            let checker = Arc::clone(self);
            tokio::spawn(async move {
                checker.probe(record).await;
            });
        }
    }

    /// Probe a single service and transduce the outcome into registry
    /// state and an audit entry. Never returns an error: failures become
    /// state transitions.
    pub(crate) async fn probe(&self, mut record: ServiceRecord) {
        let started = Instant::now();

        let url = match reqwest::Url::parse(&record.health_url()) {
            Ok(url) => url,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                warn!(
                    "Failed to build health check request for {}: {}",
                    record.name, e
                );
                self.audit
                    .record(
                        &record.id,
                        ProbeStatus::Error,
                        Some(&e.to_string()),
                        None,
                        elapsed,
                    )
                    .await;
                self.handle_failure(&mut record).await;
                return;
            }
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                warn!(
                    "Health check failed for {} ({}): {}",
                    record.name, record.id, e
                );
                self.audit
                    .record(
                        &record.id,
                        ProbeStatus::Unhealthy,
                        Some(&e.to_string()),
                        None,
                        elapsed,
                    )
                    .await;
                self.handle_failure(&mut record).await;
                return;
            }
        };

        let status = response.status();
        let body = read_body_capped(response, RESPONSE_BODY_CAP).await;
        let elapsed = elapsed_ms(started);
        let body = (!body.is_empty()).then_some(body);

        if status.is_success() {
            record.mark_healthy();
            if let Err(e) = self
                .registry
                .update_status(
                    &record.id,
                    record.status,
                    record.last_checked_at,
                    record.failure_count,
                )
                .await
            {
                warn!(
                    "Failed to persist healthy status for {}: {}",
                    record.name, e
                );
            }
            self.audit
                .record(
                    &record.id,
                    ProbeStatus::Healthy,
                    None,
                    body.as_deref(),
                    elapsed,
                )
                .await;
            debug!(
                "Health check passed for {} ({}): status={}, time={}ms",
                record.name, record.id, status, elapsed
            );
        } else {
            warn!(
                "Health check failed for {} ({}): status={}",
                record.name, record.id, status
            );
            self.audit
                .record(
                    &record.id,
                    ProbeStatus::Unhealthy,
                    Some(&format!("HTTP {}", status.as_u16())),
                    body.as_deref(),
                    elapsed,
                )
                .await;
            self.handle_failure(&mut record).await;
        }
    }

    /// Record a failed probe: bump the failure count, persist the new
    /// status, and optionally deregister a chronically failing service.
    async fn handle_failure(&self, record: &mut ServiceRecord) {
        record.mark_unhealthy(self.config.failure_threshold);

        if let Err(e) = self
            .registry
            .update_status(
                &record.id,
                record.status,
                record.last_checked_at,
                record.failure_count,
            )
            .await
        {
            // The record may have been deregistered while the probe was in
            // flight; it must not be resurrected.
            warn!(
                "Failed to persist unhealthy status for {}: {}",
                record.name, e
            );
            return;
        }

        if self.config.auto_deregister
            && record.failure_count >= self.config.max_consecutive_failures
        {
            warn!(
                "Service {} ({}) exceeded {} consecutive failures, deregistering",
                record.name, record.id, self.config.max_consecutive_failures
            );
            if let Err(e) = self.registry.deregister(&record.id).await {
                warn!("Failed to deregister service {}: {}", record.id, e);
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

/// Read a response body up to `cap` bytes, silently discarding overflow.
pub(crate) async fn read_body_capped(response: reqwest::Response, cap: usize) -> String {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => break,
        };
        let remaining = cap - buffer.len();
        if remaining == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ServiceStore, SqliteStore};
    use crate::types::ServiceStatus;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        registry: Arc<ServiceRegistry>,
        audit: Arc<AuditLog>,
        checker: Arc<HealthChecker>,
        _dir: TempDir,
    }

    async fn fixture(config: HealthCheckConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ServiceStore> = Arc::new(
            SqliteStore::new(dir.path().join("portico.db")).await.unwrap(),
        );
        let registry = Arc::new(ServiceRegistry::new(Arc::clone(&store)).await);
        let audit = Arc::new(AuditLog::new(store));
        let checker = Arc::new(
            HealthChecker::new(Arc::clone(&registry), Arc::clone(&audit), config).unwrap(),
        );
        Fixture {
            registry,
            audit,
            checker,
            _dir: dir,
        }
    }

    fn quick_config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_secs(2),
            ..HealthCheckConfig::default()
        }
    }

    /// Stub backend whose health endpoint serves the status code held in
    /// the returned handle.
    async fn spawn_stub(initial_status: u16, body: &'static str) -> (SocketAddr, Arc<AtomicU16>) {
        let status = Arc::new(AtomicU16::new(initial_status));
        let handler_status = Arc::clone(&status);
        let app = Router::new().route(
            "/health",
            get(move || {
                let status = Arc::clone(&handler_status);
                async move {
                    let code = StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap();
                    (code, body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, status)
    }

    #[tokio::test]
    async fn test_successful_probe_records_healthy() {
        let fixture = fixture(quick_config()).await;
        let (addr, _) = spawn_stub(200, "OK").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        fixture.checker.probe(record.clone()).await;

        let got = fixture.registry.get_by_id(&record.id).await.unwrap();
        assert_eq!(got.status, ServiceStatus::Healthy);
        assert_eq!(got.failure_count, 0);

        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ProbeStatus::Healthy);
        assert_eq!(logs[0].response_body.as_deref(), Some("OK"));
        assert!(logs[0].error_message.is_none());
        assert!(logs[0].response_time_ms >= 0);
    }

    #[tokio::test]
    async fn test_failures_accumulate_to_threshold() {
        let fixture = fixture(quick_config()).await;
        let (addr, _) = spawn_stub(500, "boom").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        for expected_failures in 1..=2u32 {
            let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
            fixture.checker.probe(snapshot).await;
            let got = fixture.registry.get_by_id(&record.id).await.unwrap();
            assert_eq!(got.failure_count, expected_failures);
            assert_eq!(got.status, ServiceStatus::Healthy);
        }

        let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
        fixture.checker.probe(snapshot).await;
        let got = fixture.registry.get_by_id(&record.id).await.unwrap();
        assert_eq!(got.failure_count, 3);
        assert_eq!(got.status, ServiceStatus::Unhealthy);
        assert!(fixture.registry.get_healthy("api").await.is_empty());

        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert_eq!(logs.len(), 3);
        for log in &logs {
            assert_eq!(log.status, ProbeStatus::Unhealthy);
            assert_eq!(log.error_message.as_deref(), Some("HTTP 500"));
        }
    }

    #[tokio::test]
    async fn test_recovery_resets_failures() {
        let fixture = fixture(quick_config()).await;
        let (addr, status) = spawn_stub(500, "OK").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        for _ in 0..3 {
            let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
            fixture.checker.probe(snapshot).await;
        }
        assert_eq!(
            fixture.registry.get_by_id(&record.id).await.unwrap().status,
            ServiceStatus::Unhealthy
        );

        status.store(200, Ordering::SeqCst);
        let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
        fixture.checker.probe(snapshot).await;

        let got = fixture.registry.get_by_id(&record.id).await.unwrap();
        assert_eq!(got.status, ServiceStatus::Healthy);
        assert_eq!(got.failure_count, 0);
        assert_eq!(fixture.registry.get_healthy("api").await.len(), 1);

        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert_eq!(logs[0].status, ProbeStatus::Healthy);
    }

    #[tokio::test]
    async fn test_transport_failure_is_recorded() {
        let fixture = fixture(quick_config()).await;

        // Bind-then-drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        fixture.checker.probe(record.clone()).await;

        let got = fixture.registry.get_by_id(&record.id).await.unwrap();
        assert_eq!(got.failure_count, 1);

        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ProbeStatus::Unhealthy);
        assert!(logs[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_auto_deregister_after_max_failures() {
        let config = HealthCheckConfig {
            failure_threshold: 1,
            max_consecutive_failures: 2,
            auto_deregister: true,
            ..quick_config()
        };
        let fixture = fixture(config).await;
        let (addr, _) = spawn_stub(500, "boom").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
        fixture.checker.probe(snapshot).await;
        assert!(fixture.registry.get_by_id(&record.id).await.is_ok());

        let snapshot = fixture.registry.get_by_id(&record.id).await.unwrap();
        fixture.checker.probe(snapshot).await;
        assert!(matches!(
            fixture.registry.get_by_id(&record.id).await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_probe_does_not_resurrect_deregistered_service() {
        let fixture = fixture(quick_config()).await;
        let (addr, _) = spawn_stub(200, "OK").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        // Deregister between the snapshot and the probe completing.
        let snapshot = record.clone();
        fixture.registry.deregister(&record.id).await.unwrap();
        fixture.checker.probe(snapshot).await;

        assert!(fixture.registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_ticker_probes_periodically_and_stops() {
        let fixture = fixture(quick_config()).await;
        let (addr, _) = spawn_stub(200, "OK").await;

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        Arc::clone(&fixture.checker).start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        fixture.checker.stop().await;

        // Let probes that were already in flight land before counting
        tokio::time::sleep(Duration::from_millis(100)).await;
        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert!(!logs.is_empty());

        // No further probes after stop
        let count = logs.len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        assert_eq!(logs.len(), count);

        // Stop is idempotent
        fixture.checker.stop().await;
    }

    #[tokio::test]
    async fn test_body_cap_discards_overflow() {
        let fixture = fixture(quick_config()).await;

        let big = "x".repeat(RESPONSE_BODY_CAP * 2);
        let app = Router::new().route(
            "/health",
            get(move || {
                let big = big.clone();
                async move { big }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let record = fixture
            .registry
            .register(ServiceRecord::new(
                "api",
                addr.ip().to_string(),
                addr.port(),
                "/health",
            ))
            .await
            .unwrap();

        fixture.checker.probe(record.clone()).await;

        let logs = fixture.audit.recent(&record.id, 50).await.unwrap();
        let body = logs[0].response_body.as_deref().unwrap();
        assert_eq!(body.len(), RESPONSE_BODY_CAP);
    }
}
