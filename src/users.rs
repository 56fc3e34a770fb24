//! User management pass-through
//!
//! All user operations are proxied verbatim to the authentication service;
//! the gateway keeps no user state. The password-change endpoint is the one
//! place with gateway-side authorization: a user may change their own
//! password, an admin may change anyone's.

use crate::auth::client::AuthClient;
use crate::auth::middleware::{require_admin, require_auth};
use crate::error::GatewayError;
use crate::http::AppState;
use crate::types::UserClaims;
use crate::GatewayResult;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{header, Method, Response, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cap on pass-through request bodies
const MAX_PASSTHROUGH_BODY: usize = 1024 * 1024;

/// Pass-through client for user operations on the authentication service
pub struct UserGateway {
    base_url: String,
    client: reqwest::Client,
}

impl UserGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Forward a user operation and return the collaborator's status and
    /// body unchanged.
    async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> GatewayResult<Response<Body>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Proxying {} request to auth service: {}", method, url);

        let mut builder = self
            .client
            .request(method, &url)
            .header(header::CONTENT_TYPE, "application/json");
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::BackendTransport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::BackendTransport(e.to_string()))?;

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .map_err(|e| GatewayError::Internal(format!("failed to build response: {}", e)))
    }
}

/// Routes for user management, layered with authentication as in the
/// management surface: login is public, password change requires any
/// authenticated user, everything else requires admin.
pub fn router(auth: Arc<AuthClient>) -> Router<Arc<AppState>> {
    let admin_routes = Router::new()
        .route("/users/register", post(handle_register_user))
        .route("/users", get(handle_list_users))
        .route(
            "/users/:id",
            get(handle_get_user)
                .put(handle_update_user)
                .delete(handle_delete_user),
        )
        .layer(from_fn(require_admin));

    let authenticated = Router::new()
        .route("/users/:id/password", put(handle_change_password))
        .merge(admin_routes)
        .layer(from_fn_with_state(auth, require_auth));

    Router::new()
        .route("/users/login", post(handle_login))
        .merge(authenticated)
}

fn passthrough_error(err: GatewayError) -> Response<Body> {
    match err {
        // The collaborator being unreachable is a bad-gateway condition
        // here, not an auth-transport 500
        GatewayError::BackendTransport(_) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": "authentication service unavailable"})),
        )
            .into_response(),
        other => other.into_response(),
    }
}

async fn read_body(request: Request) -> Result<Bytes, Response<Body>> {
    to_bytes(request.into_body(), MAX_PASSTHROUGH_BODY)
        .await
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "failed to read request"})),
            )
                .into_response()
        })
}

async fn handle_login(State(state): State<Arc<AppState>>, request: Request) -> Response<Body> {
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    state
        .users
        .forward(Method::POST, "/users/login", body)
        .await
        .unwrap_or_else(passthrough_error)
}

async fn handle_register_user(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response<Body> {
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    state
        .users
        .forward(Method::POST, "/users/register", body)
        .await
        .unwrap_or_else(passthrough_error)
}

async fn handle_list_users(State(state): State<Arc<AppState>>) -> Response<Body> {
    state
        .users
        .forward(Method::GET, "/users", Bytes::new())
        .await
        .unwrap_or_else(passthrough_error)
}

async fn handle_get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response<Body> {
    state
        .users
        .forward(Method::GET, &format!("/users/{}", id), Bytes::new())
        .await
        .unwrap_or_else(passthrough_error)
}

async fn handle_update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Response<Body> {
    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    state
        .users
        .forward(Method::PUT, &format!("/users/{}", id), body)
        .await
        .unwrap_or_else(passthrough_error)
}

async fn handle_delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response<Body> {
    state
        .users
        .forward(Method::DELETE, &format!("/users/{}", id), Bytes::new())
        .await
        .unwrap_or_else(passthrough_error)
}

/// Users can change their own password, admins can change any password.
async fn handle_change_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Response<Body> {
    let claims = match request.extensions().get::<UserClaims>() {
        Some(claims) => claims.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "no claims found"})),
            )
                .into_response()
        }
    };

    if claims.id != id && !claims.has_role("admin") {
        warn!(
            "User {} attempted to change password for user {}",
            claims.id, id
        );
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "can only change your own password"})),
        )
            .into_response();
    }

    let body = match read_body(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    state
        .users
        .forward(Method::POST, &format!("/users/{}/password", id), body)
        .await
        .unwrap_or_else(passthrough_error)
}
