//! Types for Portico Gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Health status of a registered service instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Draining,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Draining => "draining",
        }
    }

    /// Parse a status string as stored in the database.
    /// Unknown values fall back to `Unhealthy` so a corrupted row is never routed to.
    pub fn parse(value: &str) -> Self {
        match value {
            "healthy" => ServiceStatus::Healthy,
            "unhealthy" => ServiceStatus::Unhealthy,
            "draining" => ServiceStatus::Draining,
            _ => ServiceStatus::Unhealthy,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered backend service instance
///
/// Contains connection details, health status, and operator-supplied
/// metadata. The registry owns the canonical in-memory copy; the storage
/// layer owns the durable copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique service identifier, generated at creation
    pub id: String,

    /// Logical service name, not unique on its own
    pub name: String,

    /// Hostname or IP literal
    pub host: String,

    /// Service port
    pub port: u16,

    /// Either "http" or "https"
    pub protocol: String,

    /// Absolute health check path, begins with '/'
    pub health_check_path: String,

    /// Current health status
    pub status: ServiceStatus,

    /// Operator-supplied metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,

    /// When the service was registered; never mutated afterwards
    pub registered_at: DateTime<Utc>,

    /// When the service was last probed
    pub last_checked_at: DateTime<Utc>,

    /// Consecutive failed probes
    pub failure_count: u32,
}

impl ServiceRecord {
    /// Create a new service record with a generated ID.
    ///
    /// New records start optimistically healthy with a zero failure count;
    /// the health checker corrects the status within one tick if that is
    /// wrong. The protocol defaults to "http".
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        health_check_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            host: host.into(),
            port,
            protocol: "http".to_string(),
            health_check_path: health_check_path.into(),
            status: ServiceStatus::Healthy,
            metadata: HashMap::new(),
            registered_at: now,
            last_checked_at: now,
            failure_count: 0,
        }
    }

    /// Full base URL of the service, e.g. "http://api-server:8080"
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Full health check URL, e.g. "http://api-server:8080/health"
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_check_path)
    }

    /// Mark the service healthy and reset the failure count.
    pub fn mark_healthy(&mut self) {
        self.status = ServiceStatus::Healthy;
        self.failure_count = 0;
        self.last_checked_at = Utc::now();
    }

    /// Record a failed probe, flipping to unhealthy once `threshold`
    /// consecutive failures have accumulated.
    pub fn mark_unhealthy(&mut self, threshold: u32) {
        self.failure_count += 1;
        self.last_checked_at = Utc::now();

        if self.failure_count >= threshold {
            self.status = ServiceStatus::Unhealthy;
        }
    }
}

/// Outcome of a single health probe as recorded in the audit log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
    Error,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Healthy => "healthy",
            ProbeStatus::Unhealthy => "unhealthy",
            ProbeStatus::Error => "error",
        }
    }

    /// Parse a probe status string as stored in the database.
    pub fn parse(value: &str) -> Self {
        match value {
            "healthy" => ProbeStatus::Healthy,
            "unhealthy" => ProbeStatus::Unhealthy,
            _ => ProbeStatus::Error,
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single health check log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckEntry {
    /// Auto-assigned row identifier
    pub id: i64,

    /// ID of the service that was probed
    pub service_id: String,

    /// When the probe completed
    pub checked_at: DateTime<Utc>,

    /// Probe outcome
    pub status: ProbeStatus,

    /// Failure reason, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Response body, capped at 10 KiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,

    /// Probe duration in milliseconds
    pub response_time_ms: i64,
}

/// Authenticated user information attached to a request
///
/// Carried only in request extensions for the lifetime of one request;
/// never persisted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub id: String,
    pub subject: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl UserClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
