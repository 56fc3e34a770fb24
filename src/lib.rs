//! Portico Gateway for registering backend services and routing traffic
//!
//! This crate provides a lightweight API gateway: a durable registry of
//! backend service instances, a periodic health checker that records the
//! history of every probe, and a reverse proxy that routes requests by
//! logical service name to a currently-healthy instance. Management
//! endpoints are gated by bearer tokens validated against an external
//! authentication service.

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod storage;
pub mod types;
pub mod users;

// Re-export main types
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use registry::ServiceRegistry;
pub use types::*;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway version information
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway name
pub const GATEWAY_NAME: &str = "portico-gateway";

/// Context prefix for the management API and dynamic routing
pub const CONTEXT_PATH: &str = "/portico";

/// Cap on stored health check response bodies
pub const RESPONSE_BODY_CAP: usize = 10 * 1024;

/// Default health check interval in seconds
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Default health check timeout in seconds
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default consecutive failures before a service is marked unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default consecutive failures before auto-deregistration (when enabled)
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;
