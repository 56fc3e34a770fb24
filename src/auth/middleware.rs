//! Authentication and authorization middleware
//!
//! `require_auth` turns a bearer token into `UserClaims` attached to the
//! request; `require_admin` and `require_permission` gate on those claims
//! and therefore must be layered inside `require_auth`. Every rejection is
//! a `GatewayError`, rendered through its `IntoResponse` impl.

use crate::auth::client::AuthClient;
use crate::error::GatewayError;
use crate::types::UserClaims;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validate the bearer token and attach the caller's claims to the request.
pub async fn require_auth(
    State(auth): State<Arc<AuthClient>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => value.to_str().unwrap_or(""),
        None => {
            warn!("Missing Authorization header");
            return GatewayError::AuthMissing.into_response();
        }
    };

    let mut parts = header_value.splitn(2, ' ');
    let token = match (parts.next(), parts.next()) {
        (Some("Bearer"), Some(token)) => token,
        _ => {
            warn!("Invalid Authorization header format");
            return GatewayError::AuthMalformed.into_response();
        }
    };

    let verdict = match auth.validate_token(token).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("Token validation error: {:?}", e);
            return e.into_response();
        }
    };

    if !verdict.valid {
        warn!(
            "Invalid token: {}",
            verdict.error.as_deref().unwrap_or("no reason given")
        );
        return GatewayError::AuthInvalid.into_response();
    }

    let claims: UserClaims = match verdict.user {
        Some(user) => user.into(),
        None => {
            warn!("Valid verdict without user information");
            return GatewayError::AuthInvalid.into_response();
        }
    };

    debug!("Authenticated user: {} ({})", claims.subject, claims.id);
    request.extensions_mut().insert(claims);
    next.run(request).await
}

/// Reject requests whose authenticated user lacks the admin role.
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<UserClaims>() {
        Some(claims) if claims.has_role("admin") => next.run(request).await,
        Some(claims) => {
            warn!("Access denied for {}: admin role required", claims.subject);
            GatewayError::Forbidden("admin access required".to_string()).into_response()
        }
        None => {
            warn!("No claims found in request context");
            GatewayError::Forbidden("no roles found".to_string()).into_response()
        }
    }
}

/// Middleware that rejects users lacking the given permission.
pub fn require_permission(
    permission: &'static str,
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |request: Request, next: Next| {
        Box::pin(async move {
            match request.extensions().get::<UserClaims>() {
                Some(claims) if claims.has_permission(permission) => next.run(request).await,
                Some(claims) => {
                    warn!(
                        "Access denied for {}: permission '{}' required",
                        claims.subject, permission
                    );
                    GatewayError::Forbidden("insufficient permissions".to_string())
                        .into_response()
                }
                None => {
                    warn!("No claims found in request context");
                    GatewayError::Forbidden("no permissions found".to_string()).into_response()
                }
            }
        })
    }
}
