//! Configuration for Portico Gateway
//!
//! Configuration is assembled from defaults, an optional TOML file named by
//! `PORTICO_CONFIG`, and `PORTICO_*` environment variable overrides, in that
//! order. Duration-valued environment variables are plain seconds.

use crate::error::GatewayError;
use crate::GatewayResult;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Configuration for the Portico Gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Persistence settings
    pub database: DatabaseConfig,

    /// Health checker settings
    pub health_check: HealthCheckConfig,

    /// Authentication collaborator settings
    pub auth: AuthConfig,

    /// Reverse proxy settings
    pub proxy: ProxyConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            health_check: HealthCheckConfig::default(),
            auth: AuthConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Maximum accepted header size in bytes
    pub max_header_bytes: usize,

    /// Inbound read timeout
    pub read_timeout: Duration,

    /// Outbound write timeout; also bounds total request handling
    pub write_timeout: Duration,

    /// Keep-alive idle timeout
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_header_bytes: 1024 * 1024,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "portico.db".to_string(),
        }
    }
}

/// Health checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Consecutive failures before a service is marked unhealthy
    pub failure_threshold: u32,

    /// Consecutive failures before auto-deregistration
    pub max_consecutive_failures: u32,

    /// Whether chronic failures deregister the service automatically.
    /// Off by default: operators expect an unhealthy record to stay
    /// visible until explicitly removed.
    pub auto_deregister: bool,

    /// How often to probe registered services
    pub interval: Duration,

    /// HTTP timeout for a single probe
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::DEFAULT_FAILURE_THRESHOLD,
            max_consecutive_failures: crate::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            auto_deregister: false,
            interval: Duration::from_secs(crate::DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(crate::DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        }
    }
}

/// Authentication collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the authentication service
    pub base_url: String,

    /// Per-call timeout for collaborator requests
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3100/api".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Reverse proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Default timeout for forwarded backend requests
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Load configuration: defaults, then the optional `PORTICO_CONFIG`
    /// TOML file, then environment overrides. Validates before returning.
    pub fn load() -> GatewayResult<Self> {
        let mut config = match std::env::var("PORTICO_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            GatewayError::Configuration(format!("failed to parse config file {}: {}", path, e))
        })
    }

    /// Apply `PORTICO_*` environment variable overrides.
    fn apply_env(&mut self) {
        env_string("PORTICO_SERVER_HOST", &mut self.server.host);
        env_parse("PORTICO_SERVER_PORT", &mut self.server.port);
        env_duration_secs("PORTICO_SERVER_READ_TIMEOUT", &mut self.server.read_timeout);
        env_duration_secs(
            "PORTICO_SERVER_WRITE_TIMEOUT",
            &mut self.server.write_timeout,
        );
        env_duration_secs("PORTICO_SERVER_IDLE_TIMEOUT", &mut self.server.idle_timeout);
        env_parse(
            "PORTICO_SERVER_MAX_HEADER_BYTES",
            &mut self.server.max_header_bytes,
        );

        env_string("PORTICO_DB_PATH", &mut self.database.path);

        env_duration_secs(
            "PORTICO_HEALTH_CHECK_INTERVAL",
            &mut self.health_check.interval,
        );
        env_duration_secs(
            "PORTICO_HEALTH_CHECK_TIMEOUT",
            &mut self.health_check.timeout,
        );
        env_parse(
            "PORTICO_HEALTH_CHECK_THRESHOLD",
            &mut self.health_check.failure_threshold,
        );
        env_parse(
            "PORTICO_HEALTH_CHECK_MAX_FAILURES",
            &mut self.health_check.max_consecutive_failures,
        );
        env_parse(
            "PORTICO_HEALTH_CHECK_AUTO_DEREGISTER",
            &mut self.health_check.auto_deregister,
        );

        env_string("PORTICO_AUTH_URL", &mut self.auth.base_url);
        env_duration_secs("PORTICO_AUTH_TIMEOUT", &mut self.auth.timeout);

        env_duration_secs("PORTICO_PROXY_TIMEOUT", &mut self.proxy.request_timeout);

        env_string("PORTICO_LOG_LEVEL", &mut self.log_level);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.server.port == 0 {
            return Err(GatewayError::Configuration(
                "server port must be in 1..=65535".to_string(),
            ));
        }
        if self.server.read_timeout.is_zero() || self.server.write_timeout.is_zero() {
            return Err(GatewayError::Configuration(
                "server timeouts must be positive".to_string(),
            ));
        }
        if self.database.path.is_empty() {
            return Err(GatewayError::Configuration(
                "database path must not be empty".to_string(),
            ));
        }
        if self.health_check.interval.is_zero() || self.health_check.timeout.is_zero() {
            return Err(GatewayError::Configuration(
                "health check interval and timeout must be positive".to_string(),
            ));
        }
        if self.health_check.failure_threshold == 0 {
            return Err(GatewayError::Configuration(
                "health check failure threshold must be at least 1".to_string(),
            ));
        }
        if self.auth.base_url.is_empty() {
            return Err(GatewayError::Configuration(
                "auth base URL must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Override a string value from the environment.
fn env_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

/// Override a parseable value from the environment, keeping the current
/// value (with a warning) when parsing fails.
fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = std::env::var(key) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring {}: cannot parse {:?}", key, value),
        }
    }
}

/// Override a duration from the environment, given in whole seconds.
fn env_duration_secs(key: &str, target: &mut Duration) {
    if let Ok(value) = std::env::var(key) {
        match value.parse::<u64>() {
            Ok(secs) => *target = Duration::from_secs(secs),
            Err(_) => warn!("Ignoring {}: cannot parse {:?} as seconds", key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.health_check.interval, Duration::from_secs(30));
        assert_eq!(config.health_check.timeout, Duration::from_secs(5));
        assert_eq!(config.health_check.failure_threshold, 3);
        assert_eq!(config.health_check.max_consecutive_failures, 10);
        assert!(!config.health_check.auto_deregister);
        assert_eq!(config.proxy.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = GatewayConfig::default();
        config.health_check.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_db_path() {
        let mut config = GatewayConfig::default();
        config.database.path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = GatewayConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.health_check.interval, config.health_check.interval);
        assert_eq!(parsed.auth.base_url, config.auth.base_url);
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let result = GatewayConfig::from_file("/nonexistent/portico.toml");
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}
