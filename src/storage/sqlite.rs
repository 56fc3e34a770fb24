//! SQLite storage implementation

use crate::error::GatewayError;
use crate::storage::ServiceStore;
use crate::types::{HealthCheckEntry, ProbeStatus, ServiceRecord, ServiceStatus};
use crate::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// SQLite storage backend
///
/// Owns the durable copy of service records and health check logs. The
/// `UNIQUE(name, host, port)` constraint is a safety net against races with
/// external writers; the registry enforces the same rule under its lock.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    ///
    /// Foreign-key enforcement is switched on for every connection so that
    /// deleting a service cascades to its health check logs.
    pub async fn new(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::Storage(format!("connection error: {}", e)))?;

        Self::migrate(&pool).await?;

        info!("Database initialized at {}", path.as_ref().display());
        Ok(Self { pool })
    }

    /// Create the schema.
    async fn migrate(pool: &SqlitePool) -> GatewayResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL DEFAULT 'http',
                health_check_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'healthy',
                metadata TEXT,
                registered_at TEXT NOT NULL,
                last_checked_at TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE(name, host, port)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_services_name ON services(name)",
            "CREATE INDEX IF NOT EXISTS idx_services_status ON services(status)",
            r#"
            CREATE TABLE IF NOT EXISTS health_check_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
                checked_at TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                response_body TEXT,
                response_time_ms INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_health_logs_service ON health_check_logs(service_id)",
            "CREATE INDEX IF NOT EXISTS idx_health_logs_checked_at ON health_check_logs(checked_at)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| GatewayError::Storage(format!("migration error: {}", e)))?;
        }

        debug!("Database migrations completed");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> GatewayResult<ServiceRecord> {
        let id: String = row.try_get("id")?;
        let port: i64 = row.try_get("port")?;
        let status: String = row.try_get("status")?;
        let metadata: Option<String> = row.try_get("metadata")?;
        let registered_at: String = row.try_get("registered_at")?;
        let last_checked_at: String = row.try_get("last_checked_at")?;
        let failure_count: i64 = row.try_get("failure_count")?;

        Ok(ServiceRecord {
            name: row.try_get("name")?,
            host: row.try_get("host")?,
            port: port.clamp(0, u16::MAX as i64) as u16,
            protocol: row.try_get("protocol")?,
            health_check_path: row.try_get("health_check_path")?,
            status: ServiceStatus::parse(&status),
            metadata: parse_metadata(&id, metadata.as_deref()),
            registered_at: parse_timestamp(&id, &registered_at),
            last_checked_at: parse_timestamp(&id, &last_checked_at),
            failure_count: failure_count.max(0) as u32,
            id,
        })
    }
}

/// Parse a stored metadata mapping; malformed text is logged and treated
/// as empty.
fn parse_metadata(service_id: &str, raw: Option<&str>) -> HashMap<String, String> {
    match raw {
        None | Some("") => HashMap::new(),
        Some(text) => match serde_json::from_str(text) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    "Failed to parse metadata for service {}: {}",
                    service_id, e
                );
                HashMap::new()
            }
        },
    }
}

/// Parse a stored timestamp; failures fall back to now with a warning and
/// never abort startup.
fn parse_timestamp(service_id: &str, raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(timestamp) => timestamp.with_timezone(&Utc),
        Err(e) => {
            warn!(
                "Failed to parse timestamp {:?} for service {}: {}",
                raw, service_id, e
            );
            Utc::now()
        }
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl ServiceStore for SqliteStore {
    async fn load_all_services(&self) -> GatewayResult<Vec<ServiceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, host, port, protocol, health_check_path, status,
                   metadata, registered_at, last_checked_at, failure_count
            FROM services
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Failed to read service row: {}", e),
            }
        }

        Ok(records)
    }

    async fn insert_service(&self, record: &ServiceRecord) -> GatewayResult<()> {
        let metadata = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO services (
                id, name, host, port, protocol, health_check_path, status,
                metadata, registered_at, last_checked_at, failure_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.host)
        .bind(record.port as i64)
        .bind(&record.protocol)
        .bind(&record.health_check_path)
        .bind(record.status.as_str())
        .bind(metadata)
        .bind(format_timestamp(record.registered_at))
        .bind(format_timestamp(record.last_checked_at))
        .bind(record.failure_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_service(&self, id: &str) -> GatewayResult<()> {
        sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: ServiceStatus,
        last_checked_at: DateTime<Utc>,
        failure_count: u32,
    ) -> GatewayResult<()> {
        sqlx::query(
            r#"
            UPDATE services
            SET status = ?, last_checked_at = ?, failure_count = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(format_timestamp(last_checked_at))
        .bind(failure_count as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_log(
        &self,
        service_id: &str,
        status: ProbeStatus,
        error_message: Option<&str>,
        response_body: Option<&str>,
        response_time_ms: i64,
    ) -> GatewayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO health_check_logs (
                service_id, checked_at, status, error_message, response_body, response_time_ms
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(service_id)
        .bind(format_timestamp(Utc::now()))
        .bind(status.as_str())
        .bind(error_message)
        .bind(response_body)
        .bind(response_time_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn select_logs(
        &self,
        service_id: &str,
        limit: u32,
    ) -> GatewayResult<Vec<HealthCheckEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, checked_at, status, error_message, response_body, response_time_ms
            FROM health_check_logs
            WHERE service_id = ?
            ORDER BY checked_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.try_get("status")?;
            let checked_at: String = row.try_get("checked_at")?;
            let service_id: String = row.try_get("service_id")?;
            entries.push(HealthCheckEntry {
                id: row.try_get("id")?,
                checked_at: parse_timestamp(&service_id, &checked_at),
                service_id,
                status: ProbeStatus::parse(&status),
                error_message: row.try_get("error_message")?,
                response_body: row.try_get("response_body")?,
                response_time_ms: row.try_get("response_time_ms")?,
            });
        }

        Ok(entries)
    }

    async fn shutdown(&self) -> GatewayResult<()> {
        self.pool.close().await;
        debug!("SQLite storage shutdown completed");
        Ok(())
    }
}
