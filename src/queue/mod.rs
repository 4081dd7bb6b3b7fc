// Command queue port: keyed publish, at-least-once delivery, dead-letter channel

mod memory;

pub use memory::MemoryQueue;

use crate::command::{CommandEnvelope, DeadLetter};
use crate::error::QueueError;
use async_trait::async_trait;

/// One channel of commands (one per record collection).
///
/// Ordering is only guaranteed between messages with the same key, and only
/// as far as the backing broker preserves publish order for that key.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    async fn publish(&self, key: &str, envelope: &CommandEnvelope) -> Result<(), QueueError>;

    /// Wait for the next delivery. `None` once the queue is closed.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError>;
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Processing finished (applied or dead-lettered); remove the message.
    async fn ack(&self) -> Result<(), QueueError>;

    /// Processing failed; ask the broker to redeliver.
    async fn nack(&self) -> Result<(), QueueError>;
}

/// A message handed to a consumer, not yet settled.
pub struct Delivery {
    pub key: String,
    /// Raw bytes as published; may not be a valid envelope.
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        key: String,
        payload: Vec<u8>,
        attempt: u32,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            key,
            payload,
            attempt,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    pub async fn nack(&self) -> Result<(), QueueError> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}
