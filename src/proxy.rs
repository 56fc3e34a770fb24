//! HTTP reverse proxy engine
//!
//! Forwards an inbound request to a backend URL, preserving method, headers,
//! query string, and body, while stripping hop-by-hop headers and adding the
//! standard X-Forwarded-* set. Stateless and safe for concurrent use.

use crate::error::GatewayError;
use crate::GatewayResult;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error};

/// Headers meaningful only for a single transport-level connection;
/// never forwarded through the proxy.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Returns true if the header is a hop-by-hop header.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Build the URL a request should be forwarded to.
///
/// Trims `strip_prefix` from `path`, ensures a leading slash, and appends
/// the result to the backend base URL.
pub fn build_target_url(base_url: &str, path: &str, strip_prefix: &str) -> String {
    let mut path = if !strip_prefix.is_empty() {
        path.strip_prefix(strip_prefix).unwrap_or(path)
    } else {
        path
    }
    .to_string();

    if !path.is_empty() && !path.starts_with('/') {
        path = format!("/{}", path);
    }

    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Proxy engine for forwarding requests to backend services
pub struct ProxyEngine {
    client: reqwest::Client,
}

impl ProxyEngine {
    /// Create a new proxy engine.
    ///
    /// The client never follows redirects: a 3xx from the backend is
    /// returned to the caller verbatim.
    pub fn new(request_timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Forward a request to `target_url` and stream the backend response
    /// back. A `timeout` of `None` uses the engine default.
    pub async fn forward(
        &self,
        request: Request,
        target_url: &str,
        timeout: Option<Duration>,
    ) -> GatewayResult<Response<Body>> {
        let mut url = reqwest::Url::parse(target_url)
            .map_err(|e| GatewayError::Internal(format!("invalid target URL: {}", e)))?;

        // Merge the inbound raw query into the target URL
        if let Some(inbound_query) = request.uri().query() {
            let merged = match url.query() {
                Some(existing) if !existing.is_empty() => {
                    format!("{}&{}", existing, inbound_query)
                }
                _ => inbound_query.to_string(),
            };
            url.set_query(Some(&merged));
        }

        debug!("Forwarding request to: {}", url);

        let (parts, body) = request.into_parts();

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            // Host and Content-Length are recomputed for the outbound request
            if is_hop_by_hop_header(name.as_str())
                || name == header::HOST
                || name == header::CONTENT_LENGTH
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if let Some(ConnectInfo(remote)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            if let Ok(value) = HeaderValue::from_str(&remote.to_string()) {
                headers.insert("x-forwarded-for", value);
            }
        }
        let proto = parts.uri.scheme_str().unwrap_or("http");
        if let Ok(value) = HeaderValue::from_str(proto) {
            headers.insert("x-forwarded-proto", value);
        }
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert("x-forwarded-host", host.clone());
        }

        let mut builder = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let backend_response = builder.send().await.map_err(|e| {
            error!("Backend request failed: {}", e);
            GatewayError::BackendTransport(e.to_string())
        })?;

        let mut response = Response::builder().status(backend_response.status());
        for (name, value) in backend_response.headers() {
            if is_hop_by_hop_header(name.as_str()) {
                continue;
            }
            response = response.header(name, value);
        }

        response
            .body(Body::from_stream(backend_response.bytes_stream()))
            .map_err(|e| GatewayError::Internal(format!("failed to build response: {}", e)))
    }
}
