//! HTTP client for the external authentication service

use crate::error::GatewayError;
use crate::types::UserClaims;
use crate::GatewayResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for the authentication collaborator
///
/// Stateless and safe for concurrent use. Transport and decoding problems
/// surface as `AuthTransport`; a negative validation verdict is a normal
/// response, never a transport error.
pub struct AuthClient {
    base_url: String,
    client: reqwest::Client,
}

/// Token validation request payload
#[derive(Debug, Serialize)]
struct ValidateTokenRequest<'a> {
    token: &'a str,
}

/// Token validation response
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,

    #[serde(default)]
    pub user: Option<AuthUser>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authenticated user information returned by the collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub subject: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,
}

impl From<AuthUser> for UserClaims {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            subject: user.subject,
            roles: user.roles,
            permissions: user.permissions,
        }
    }
}

impl AuthClient {
    /// Create a new client for the collaborator at `base_url`.
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

    /// Validate an opaque bearer token.
    pub async fn validate_token(&self, token: &str) -> GatewayResult<ValidateTokenResponse> {
        let url = format!("{}/auth/validate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ValidateTokenRequest { token })
            .send()
            .await
            .map_err(|e| GatewayError::AuthTransport(e.to_string()))?;

        let verdict: ValidateTokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthTransport(e.to_string()))?;

        debug!("Token validation verdict: valid={}", verdict.valid);
        Ok(verdict)
    }

    /// Liveness probe of the collaborator; ok iff it answers 200.
    pub async fn health(&self) -> GatewayResult<()> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::AuthTransport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(GatewayError::AuthTransport(format!(
                "status {}",
                response.status()
            )))
        }
    }
}
