// NATS JetStream command channels

mod client;
mod queue;

pub use client::{NatsClient, NatsConfig};
pub use queue::{NatsQueue, KEY_HEADER};
