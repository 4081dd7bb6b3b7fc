//! HTTP forwarding to upstreams.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use crate::error::GatewayError;
use crate::route::Route;

/// Hop-by-hop and framing headers that are not forwarded as-is.
const SKIPPED_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Request as received from the client, body already buffered.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path plus optional `?query`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream answer, kept whole so the caller can inspect the status before
/// deciding whether it counts as a failure.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_failure(&self) -> bool {
        self.status.is_server_error()
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug, Clone)]
pub struct Proxy {
    client: reqwest::Client,
    timeout: Duration,
}

impl Proxy {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Forward `request` to the route's upstream with the route's headers
    /// added. Transport errors and timeouts are errors; any HTTP status,
    /// including 5xx, comes back as a response.
    pub async fn forward(
        &self,
        route: &Route,
        request: &ForwardRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        let url = format!("{}{}", route.upstream, request.path_and_query);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &url).timeout(self.timeout);

        for (name, value) in &request.headers {
            if SKIPPED_HEADERS.contains(name) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        for (name, value) in route.added_headers() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        tracing::debug!(route = %route.id, url = %url, "Forwarding request");

        let upstream = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) else {
                continue;
            };
            if SKIPPED_HEADERS.contains(&name) {
                continue;
            }
            headers.append(name, value);
        }

        let body = upstream.bytes().await.map_err(map_reqwest_error)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Upstream(e.to_string())
    }
}
