// Domain records (houses, devices, energy sources, batteries)
pub mod model;

// Command envelopes and the action registry
pub mod command;

// Error taxonomy shared by the coordination components
pub mod error;

// Durable state store port and backends
pub mod store;

// Cache-aside layer and cache backends
pub mod cache;

// Command queue port and backends
pub mod queue;

// Command dispatch (write path)
pub mod dispatch;

// Command consumer / actuator bridge
pub mod consumer;

// HTTP API
pub mod api;

// Service configuration
pub mod config;

// NATS client integration
pub mod nats;

pub use command::{Action, ActionRegistry, CommandEnvelope, DeadLetter};
pub use error::CityError;
pub use model::{Battery, Device, EnergySource, House, Record, TargetKind};
