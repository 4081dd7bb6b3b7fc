//! Gateway configuration.
//!
//! Loaded from TOML. With no file the gateway serves the built-in route
//! table: `/get` forwarded with a `Hello: World` header, and any
//! `*.circuitbreaker.com` host forwarded behind the `mycmd` breaker with
//! `/fallback` as its fallback.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::GatewayError;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<FallbackConfig>,
    #[serde(default)]
    pub breakers: BreakersConfig,
}

/// Values shared by every route.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    /// Upstream used by routes that do not name their own.
    #[serde(default = "default_upstream")]
    pub upstream: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub id: String,
    pub predicate: PredicateConfig,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    pub upstream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateConfig {
    /// Path prefix, matched on whole segments. A trailing `/**` is accepted.
    Path(String),
    /// Host pattern; `*.` matches any subdomain.
    Host(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    AddRequestHeader { name: String, value: String },
    CircuitBreaker { name: String, fallback: String },
}

/// A local constant response.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    pub path: String,
    pub body: String,
    #[serde(default = "default_fallback_status")]
    pub status: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakersConfig {
    #[serde(default)]
    pub default: BreakerSettings,
    /// Per-breaker overrides keyed by breaker name.
    #[serde(default)]
    pub named: HashMap<String, BreakerSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BreakerSettings {
    /// Failures (consecutive, or within the window) that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Time spent open before trial requests are allowed.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
    /// Trial successes needed to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_listen() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_upstream() -> String {
    "http://httpbin.org:80".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_fallback_status() -> u16 {
    203
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    5_000
}

fn default_half_open_max_calls() -> u32 {
    1
}

fn default_success_threshold() -> u32 {
    1
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            id: "get".to_string(),
            predicate: PredicateConfig::Path("/get".to_string()),
            filters: vec![FilterConfig::AddRequestHeader {
                name: "Hello".to_string(),
                value: "World".to_string(),
            }],
            upstream: None,
        },
        RouteConfig {
            id: "circuitbreaker".to_string(),
            predicate: PredicateConfig::Host("*.circuitbreaker.com".to_string()),
            filters: vec![FilterConfig::CircuitBreaker {
                name: "mycmd".to_string(),
                fallback: "/fallback".to_string(),
            }],
            upstream: None,
        },
    ]
}

fn default_fallbacks() -> Vec<FallbackConfig> {
    vec![FallbackConfig {
        path: "/fallback".to_string(),
        body: "fallback".to_string(),
        status: default_fallback_status(),
    }]
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            upstream: default_upstream(),
            timeout_ms: default_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_ms: default_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            half_open_max_calls: default_half_open_max_calls(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            defaults: DefaultsConfig::default(),
            routes: default_routes(),
            fallbacks: default_fallbacks(),
            breakers: BreakersConfig::default(),
        }
    }
}

impl BreakersConfig {
    pub fn settings_for(&self, name: &str) -> BreakerSettings {
        self.named
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl GatewayConfig {
    /// Parse and check a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, GatewayError> {
        let config: GatewayConfig =
            toml::from_str(contents).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, GatewayError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("{}: {}", path, e)))?;
        Self::from_toml(&contents)
    }

    /// Every breaker filter must point at a declared fallback, and thresholds
    /// must be usable.
    pub fn validate(&self) -> Result<(), GatewayError> {
        for route in &self.routes {
            for filter in &route.filters {
                if let FilterConfig::CircuitBreaker { name, fallback } = filter {
                    if !self.fallbacks.iter().any(|f| &f.path == fallback) {
                        return Err(GatewayError::Config(format!(
                            "route '{}': breaker '{}' names unknown fallback '{}'",
                            route.id, name, fallback
                        )));
                    }
                }
            }
        }

        let all = std::iter::once(&self.breakers.default).chain(self.breakers.named.values());
        for settings in all {
            if settings.failure_threshold == 0
                || settings.success_threshold == 0
                || settings.half_open_max_calls == 0
            {
                return Err(GatewayError::Config(
                    "breaker thresholds must be at least 1".to_string(),
                ));
            }
        }

        for fallback in &self.fallbacks {
            if !(100..=599).contains(&fallback.status) {
                return Err(GatewayError::Config(format!(
                    "fallback '{}' has invalid status {}",
                    fallback.path, fallback.status
                )));
            }
        }

        Ok(())
    }
}
