//! Resilient gateway router: ordered path/host routes, request header
//! injection and named circuit breakers with local fallback responses.

pub mod breaker;
pub mod config;
pub mod error;
pub mod proxy;
pub mod route;
pub mod server;

pub use breaker::{BreakerPermit, BreakerRegistry, CircuitBreaker, CircuitState};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use route::{Route, RouteTable};
pub use server::{create_router, run, GatewayState, FALLBACK_HEADER};
