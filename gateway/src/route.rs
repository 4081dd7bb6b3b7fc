//! Ordered route table.

use axum::http::{HeaderName, HeaderValue};

use crate::config::{FilterConfig, GatewayConfig, PredicateConfig};
use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Normalised prefix without trailing slash or `/**`; empty matches all.
    Path(String),
    /// Lowercased host. `suffix` is set for `*.` wildcards and holds
    /// the part after the `*`, including the leading dot.
    Host { exact: String, suffix: Option<String> },
}

impl Predicate {
    fn from_config(config: &PredicateConfig) -> Self {
        match config {
            PredicateConfig::Path(pattern) => {
                let trimmed = pattern.strip_suffix("/**").unwrap_or(pattern);
                Predicate::Path(trimmed.trim_end_matches('/').to_string())
            }
            PredicateConfig::Host(pattern) => {
                let exact = pattern.to_ascii_lowercase();
                let suffix = exact.strip_prefix('*').map(str::to_string);
                Predicate::Host { exact, suffix }
            }
        }
    }

    pub fn matches(&self, path: &str, host: Option<&str>) -> bool {
        match self {
            Predicate::Path(prefix) => {
                prefix.is_empty()
                    || path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Predicate::Host { exact, suffix } => {
                let Some(host) = host else {
                    return false;
                };
                let host = strip_port(host).to_ascii_lowercase();
                match suffix {
                    // `*.example.com` needs at least one label before the suffix
                    Some(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
                    None => &host == exact,
                }
            }
        }
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    AddRequestHeader { name: HeaderName, value: HeaderValue },
    CircuitBreaker { name: String, fallback: String },
}

#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub predicate: Predicate,
    pub filters: Vec<Filter>,
    /// Base URL without trailing slash.
    pub upstream: String,
}

impl Route {
    /// Headers added before forwarding, in declaration order.
    pub fn added_headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.filters.iter().filter_map(|f| match f {
            Filter::AddRequestHeader { name, value } => Some((name, value)),
            Filter::CircuitBreaker { .. } => None,
        })
    }

    /// The route's breaker and fallback path, if it is protected.
    pub fn breaker(&self) -> Option<(&str, &str)> {
        self.filters.iter().find_map(|f| match f {
            Filter::CircuitBreaker { name, fallback } => Some((name.as_str(), fallback.as_str())),
            Filter::AddRequestHeader { .. } => None,
        })
    }
}

/// Routes in declaration order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut routes = Vec::with_capacity(config.routes.len());

        for route in &config.routes {
            let upstream = route
                .upstream
                .as_deref()
                .unwrap_or(&config.defaults.upstream);
            reqwest::Url::parse(upstream).map_err(|e| {
                GatewayError::Config(format!("route '{}': invalid upstream: {}", route.id, e))
            })?;

            let filters = route
                .filters
                .iter()
                .map(|f| build_filter(&route.id, f))
                .collect::<Result<Vec<_>, _>>()?;

            routes.push(Route {
                id: route.id.clone(),
                predicate: Predicate::from_config(&route.predicate),
                filters,
                upstream: upstream.trim_end_matches('/').to_string(),
            });
        }

        Ok(Self { routes })
    }

    pub fn find(&self, path: &str, host: Option<&str>) -> Option<&Route> {
        self.routes.iter().find(|r| r.predicate.matches(path, host))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn build_filter(route_id: &str, filter: &FilterConfig) -> Result<Filter, GatewayError> {
    match filter {
        FilterConfig::AddRequestHeader { name, value } => {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GatewayError::Config(format!("route '{}': bad header name: {}", route_id, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                GatewayError::Config(format!("route '{}': bad header value: {}", route_id, e))
            })?;
            Ok(Filter::AddRequestHeader { name, value })
        }
        FilterConfig::CircuitBreaker { name, fallback } => Ok(Filter::CircuitBreaker {
            name: name.clone(),
            fallback: fallback.clone(),
        }),
    }
}
