//! Gateway server implementation.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::BreakerRegistry;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::proxy::{ForwardRequest, Proxy};
use crate::route::{Route, RouteTable};

/// Header set on every response produced by a fallback.
pub const FALLBACK_HEADER: &str = "x-gateway-fallback";

/// A fixed local response.
#[derive(Debug, Clone)]
pub struct Fallback {
    pub status: StatusCode,
    pub body: String,
}

impl Fallback {
    fn respond(&self, breaker: Option<&str>) -> Response {
        let mut response = (self.status, self.body.clone()).into_response();
        if let Some(name) = breaker {
            if let Ok(value) = HeaderValue::from_str(name) {
                response.headers_mut().insert(FALLBACK_HEADER, value);
            }
        }
        response
    }
}

/// Shared gateway state.
#[derive(Debug)]
pub struct GatewayState {
    routes: RouteTable,
    breakers: BreakerRegistry,
    fallbacks: HashMap<String, Fallback>,
    proxy: Proxy,
    max_body_bytes: usize,
}

impl GatewayState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let fallbacks = config
            .fallbacks
            .iter()
            .map(|f| {
                let status = StatusCode::from_u16(f.status).map_err(|e| {
                    GatewayError::Config(format!("fallback '{}': {}", f.path, e))
                })?;
                Ok((
                    f.path.clone(),
                    Fallback {
                        status,
                        body: f.body.clone(),
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, GatewayError>>()?;

        Ok(Self {
            routes: RouteTable::from_config(config)?,
            breakers: BreakerRegistry::new(config.breakers.clone()),
            fallbacks,
            proxy: Proxy::new(Duration::from_millis(config.defaults.timeout_ms))?,
            max_body_bytes: config.defaults.max_body_bytes,
        })
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }
}

/// Build the gateway router.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health_check))
        .fallback(handle)
        .layer(body_limit)
        .with_state(state)
}

/// Run the gateway until the listener fails.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let state = Arc::new(GatewayState::from_config(&config)?);
    tracing::info!(
        routes = state.routes.len(),
        fallbacks = state.fallbacks.len(),
        "Route table loaded"
    );

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(addr = %config.listen, "Gateway listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    match route_request(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn route_request(state: &GatewayState, request: Request) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    let path = uri.path().to_string();
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .map(str::to_string);

    let Some(route) = state.routes.find(&path, host.as_deref()) else {
        // Fallback responders are also reachable directly
        return match state.fallbacks.get(&path) {
            Some(fallback) => Ok(fallback.respond(None)),
            None => Err(GatewayError::NoRoute(path)),
        };
    };

    // Buffered under the router's `DefaultBodyLimit`
    let body = Bytes::from_request(request, &())
        .await
        .map_err(|rejection| match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => GatewayError::PayloadTooLarge(state.max_body_bytes),
            _ => GatewayError::InvalidRequest(rejection.body_text()),
        })?;

    let forward = ForwardRequest {
        method,
        path_and_query: uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or(path),
        headers,
        body,
    };

    match route.breaker() {
        Some((breaker, fallback)) => protected(state, route, breaker, fallback, &forward).await,
        None => Ok(state.proxy.forward(route, &forward).await?.into_response()),
    }
}

/// Forward through the route's breaker, answering with the fallback when
/// the breaker is open or the upstream fails.
async fn protected(
    state: &GatewayState,
    route: &Route,
    breaker_name: &str,
    fallback_path: &str,
    request: &ForwardRequest,
) -> Result<Response, GatewayError> {
    let breaker = state.breakers.get_or_create(breaker_name);

    let Some(permit) = breaker.try_acquire() else {
        tracing::debug!(route = %route.id, breaker = %breaker_name, "Short-circuited to fallback");
        return serve_fallback(state, breaker_name, fallback_path);
    };

    // If this future is dropped mid-call the permit gives its slot back
    match state.proxy.forward(route, request).await {
        Ok(response) if !response.is_failure() => {
            permit.success();
            Ok(response.into_response())
        }
        Ok(response) => {
            permit.failure();
            tracing::warn!(
                route = %route.id,
                breaker = %breaker_name,
                status = %response.status,
                "Upstream error status, serving fallback"
            );
            serve_fallback(state, breaker_name, fallback_path)
        }
        Err(e) => {
            permit.failure();
            tracing::warn!(
                route = %route.id,
                breaker = %breaker_name,
                error = %e,
                "Upstream call failed, serving fallback"
            );
            serve_fallback(state, breaker_name, fallback_path)
        }
    }
}

fn serve_fallback(
    state: &GatewayState,
    breaker_name: &str,
    fallback_path: &str,
) -> Result<Response, GatewayError> {
    state
        .fallbacks
        .get(fallback_path)
        .map(|f| f.respond(Some(breaker_name)))
        .ok_or_else(|| GatewayError::CircuitOpen(breaker_name.to_string()))
}
