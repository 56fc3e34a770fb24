//! HTTP server for Portico Gateway
//!
//! Wires the management API, the dynamic routing endpoint, and the user
//! pass-through under the `/portico` context prefix.

use crate::audit::AuditLog;
use crate::auth::client::AuthClient;
use crate::auth::middleware::{require_admin, require_auth};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::read_body_capped;
use crate::registry::ServiceRegistry;
use crate::routing::RoutingService;
use crate::types::{ProbeStatus, ServiceRecord, ServiceStatus};
use crate::users::UserGateway;
use crate::{users, GatewayResult, CONTEXT_PATH, GATEWAY_NAME, RESPONSE_BODY_CAP};
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{HeaderMap, Response, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Json};
use axum::routing::{any, get, post};
use axum::Router as AxumRouter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

/// Default number of health log entries returned when no limit is given
const DEFAULT_HEALTH_LOG_LIMIT: u32 = 50;

/// Shared application state threaded through every handler
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub audit: Arc<AuditLog>,
    pub routing: Arc<RoutingService>,
    pub auth: Arc<AuthClient>,
    pub users: Arc<UserGateway>,
    pub probe_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<ServiceRegistry>,
        audit: Arc<AuditLog>,
        routing: Arc<RoutingService>,
        auth: Arc<AuthClient>,
        users: Arc<UserGateway>,
    ) -> GatewayResult<Self> {
        let probe_client = reqwest::Client::builder()
            .timeout(config.health_check.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            audit,
            routing,
            auth,
            users,
            probe_client,
        })
    }
}

/// HTTP server for the gateway
pub struct HttpServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(config: GatewayConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Create the router with all endpoints under the context prefix.
    pub fn create_router(&self) -> AxumRouter {
        let admin_routes = AxumRouter::new()
            .route(
                "/services",
                post(handle_register_service).get(handle_list_services),
            )
            .route(
                "/services/:id",
                get(handle_get_service).delete(handle_deregister_service),
            )
            .route("/services/:id/health-logs", get(handle_get_health_logs))
            .layer(from_fn(require_admin))
            .layer(from_fn_with_state(
                Arc::clone(&self.state.auth),
                require_auth,
            ));

        let public_routes = AxumRouter::new()
            .route("/health", get(handle_health))
            .route("/register", post(handle_self_register))
            .route("/route/:name", any(handle_route_root))
            .route("/route/:name/*path", any(handle_route));

        let api = public_routes
            .merge(admin_routes)
            .merge(users::router(Arc::clone(&self.state.auth)));

        AxumRouter::new()
            .nest(CONTEXT_PATH, api)
            .layer(TimeoutLayer::new(self.config.server.write_timeout))
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state))
    }
}

/// Payload for admin service registration; host is required.
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: String,

    #[serde(default)]
    host: String,

    #[serde(default)]
    port: u16,

    #[serde(default)]
    health_check_path: String,

    #[serde(default)]
    protocol: Option<String>,

    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// Payload for self-registration; host is auto-detected when absent.
#[derive(Debug, Deserialize)]
struct SelfRegisterRequest {
    #[serde(default)]
    name: String,

    #[serde(default)]
    host: Option<String>,

    #[serde(default)]
    port: u16,

    #[serde(default)]
    health_check_path: String,

    #[serde(default)]
    protocol: Option<String>,

    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

fn bad_request(message: &str) -> Response<Body> {
    GatewayError::BadRequest(message.to_string()).into_response()
}

/// Shared validation for both registration endpoints.
fn validate_registration(
    name: &str,
    port: u16,
    health_check_path: &str,
    protocol: Option<&str>,
) -> Result<(), GatewayError> {
    if name.is_empty() {
        return Err(GatewayError::BadRequest("name is required".to_string()));
    }
    if port == 0 {
        return Err(GatewayError::BadRequest(
            "port must be provided".to_string(),
        ));
    }
    if !health_check_path.starts_with('/') {
        return Err(GatewayError::BadRequest(
            "health_check_path must begin with '/'".to_string(),
        ));
    }
    if let Some(protocol) = protocol {
        if protocol != "http" && protocol != "https" {
            return Err(GatewayError::BadRequest(
                "protocol must be http or https".to_string(),
            ));
        }
    }
    Ok(())
}

/// Outcome of the inline probe performed at registration time
struct InitialProbe {
    healthy: bool,
    status: ProbeStatus,
    error_message: Option<String>,
    response_body: Option<String>,
    response_time_ms: i64,
}

/// Probe a service once before inserting it. The record is registered
/// either way; a failed probe only determines the initial status.
async fn initial_probe(client: &reqwest::Client, record: &ServiceRecord) -> InitialProbe {
    let started = Instant::now();

    match client.get(record.health_url()).send().await {
        Ok(response) => {
            let code = response.status();
            let body = read_body_capped(response, RESPONSE_BODY_CAP).await;
            let response_time_ms = started.elapsed().as_millis() as i64;
            let response_body = (!body.is_empty()).then_some(body);

            if code.is_success() {
                InitialProbe {
                    healthy: true,
                    status: ProbeStatus::Healthy,
                    error_message: None,
                    response_body,
                    response_time_ms,
                }
            } else {
                InitialProbe {
                    healthy: false,
                    status: ProbeStatus::Unhealthy,
                    error_message: Some(format!("HTTP {}", code.as_u16())),
                    response_body,
                    response_time_ms,
                }
            }
        }
        Err(e) => InitialProbe {
            healthy: false,
            status: ProbeStatus::Unhealthy,
            error_message: Some(e.to_string()),
            response_body: None,
            response_time_ms: started.elapsed().as_millis() as i64,
        },
    }
}

/// Probe, register, and audit a new service record.
async fn register_with_probe(
    state: &AppState,
    mut record: ServiceRecord,
) -> GatewayResult<ServiceRecord> {
    let probe = initial_probe(&state.probe_client, &record).await;
    if !probe.healthy {
        warn!(
            "Initial health check failed for {}, registering as unhealthy: {}",
            record.name,
            probe.error_message.as_deref().unwrap_or("no response")
        );
        record.status = ServiceStatus::Unhealthy;
    }

    let record = state.registry.register(record).await?;
    state
        .audit
        .record(
            &record.id,
            probe.status,
            probe.error_message.as_deref(),
            probe.response_body.as_deref(),
            probe.response_time_ms,
        )
        .await;

    Ok(record)
}

/// Liveness endpoint.
async fn handle_health() -> Response<Body> {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": GATEWAY_NAME,
            "timestamp": chrono::Utc::now(),
        })),
    )
        .into_response()
}

/// Auto-detect the caller's host: the first X-Forwarded-For token, then
/// X-Real-IP, then the transport-level remote address (without its port).
fn detect_client_host(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }

    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Self-registration endpoint; no authentication required.
async fn handle_self_register(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response<Body> {
    let request: SelfRegisterRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return bad_request(&e.to_string()),
    };

    if let Err(e) = validate_registration(
        &request.name,
        request.port,
        &request.health_check_path,
        request.protocol.as_deref(),
    ) {
        return e.into_response();
    }

    let host = match request.host.filter(|host| !host.is_empty()) {
        Some(host) => host,
        None => match detect_client_host(&headers, connect_info.as_ref()) {
            Some(host) => host,
            None => return bad_request("unable to determine host"),
        },
    };

    let mut record =
        ServiceRecord::new(request.name, host, request.port, request.health_check_path);
    if let Some(protocol) = request.protocol {
        record.protocol = protocol;
    }
    if let Some(metadata) = request.metadata {
        record.metadata = metadata;
    }

    match register_with_probe(&state, record).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Admin service registration; host is required.
async fn handle_register_service(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response<Body> {
    let request: RegisterRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return bad_request(&e.to_string()),
    };

    if request.host.is_empty() {
        return bad_request("host is required");
    }
    if let Err(e) = validate_registration(
        &request.name,
        request.port,
        &request.health_check_path,
        request.protocol.as_deref(),
    ) {
        return e.into_response();
    }

    let mut record = ServiceRecord::new(
        request.name,
        request.host,
        request.port,
        request.health_check_path,
    );
    if let Some(protocol) = request.protocol {
        record.protocol = protocol;
    }
    if let Some(metadata) = request.metadata {
        record.metadata = metadata;
    }

    match register_with_probe(&state, record).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// List all registered services.
async fn handle_list_services(State(state): State<Arc<AppState>>) -> Response<Body> {
    let services = state.registry.list().await;
    (
        StatusCode::OK,
        Json(json!({
            "count": services.len(),
            "services": services,
        })),
    )
        .into_response()
}

/// Look up a single service by ID.
async fn handle_get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response<Body> {
    match state.registry.get_by_id(&id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Deregister a service by ID.
async fn handle_deregister_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response<Body> {
    match state.registry.deregister(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"message": "service deregistered"})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Recent health check history for a service.
async fn handle_get_health_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response<Body> {
    if let Err(e) = state.registry.get_by_id(&id).await {
        return e.into_response();
    }

    // Invalid or non-positive limits silently fall back to the default
    let limit = params
        .get("limit")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_HEALTH_LOG_LIMIT);

    match state.audit.recent(&id, limit).await {
        Ok(logs) => (
            StatusCode::OK,
            Json(json!({
                "service_id": id,
                "count": logs.len(),
                "logs": logs,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to retrieve health logs for {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to retrieve health logs"})),
            )
                .into_response()
        }
    }
}

/// Dynamic routing without a sub-path forwards to the instance root.
async fn handle_route_root(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response<Body> {
    dispatch_route(&state, request, &name, "/".to_string()).await
}

/// Dynamic routing endpoint: `/route/{name}/{path}` forwards to the first
/// healthy instance of `{name}`.
async fn handle_route(
    State(state): State<Arc<AppState>>,
    Path((name, path)): Path<(String, String)>,
    request: Request,
) -> Response<Body> {
    dispatch_route(&state, request, &name, format!("/{}", path)).await
}

async fn dispatch_route(
    state: &AppState,
    request: Request,
    name: &str,
    path: String,
) -> Response<Body> {
    match state.routing.route_to_service(request, name, &path).await {
        Ok(response) => response,
        Err(e @ GatewayError::BackendUnavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "service unavailable",
                "service": name,
                "message": e.to_string(),
            })),
        )
            .into_response(),
        Err(e) => (
            e.status_code(),
            Json(json!({
                "error": "backend request failed",
                "service": name,
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_registration() {
        assert!(validate_registration("api", 8080, "/h", None).is_ok());
        assert!(validate_registration("api", 8080, "/h", Some("https")).is_ok());

        let err = validate_registration("", 8080, "/h", None).unwrap_err();
        assert_eq!(err.to_string(), "name is required");

        let err = validate_registration("api", 0, "/h", None).unwrap_err();
        assert_eq!(err.to_string(), "port must be provided");

        let err = validate_registration("api", 8080, "h", None).unwrap_err();
        assert_eq!(err.to_string(), "health_check_path must begin with '/'");

        let err = validate_registration("api", 8080, "/h", Some("ftp")).unwrap_err();
        assert_eq!(err.to_string(), "protocol must be http or https");
    }

    #[test]
    fn test_detect_client_host_prefers_forwarded_header() {
        let remote: SocketAddr = "192.168.1.1:55555".parse().unwrap();
        let connect_info = ConnectInfo(remote);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.5, 10.0.0.6".parse().unwrap());
        assert_eq!(
            detect_client_host(&headers, Some(&connect_info)).unwrap(),
            "10.0.0.5"
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.7".parse().unwrap());
        assert_eq!(
            detect_client_host(&headers, Some(&connect_info)).unwrap(),
            "10.0.0.7"
        );

        // Transport remote address loses its port segment
        let headers = HeaderMap::new();
        assert_eq!(
            detect_client_host(&headers, Some(&connect_info)).unwrap(),
            "192.168.1.1"
        );

        assert!(detect_client_host(&headers, None).is_none());
    }
}
