//! Command consumer / actuator bridge.
//!
//! Each delivery moves `Received -> Processing -> Applied | Failed`. A failed
//! delivery is either handed back to the broker for redelivery (while
//! attempts remain) or dead-lettered with its reason and acknowledged.
//! Nothing consumed here is ever dropped without one of those outcomes.

mod actuator;

pub use actuator::{Actuator, ActuatorError, LogActuator};

use crate::command::{CommandEnvelope, DeadLetter};
use crate::dispatch::target_kind;
use crate::error::QueueError;
use crate::model::Record;
use crate::queue::{CommandQueue, Delivery};
use crate::store::StateStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where a delivery is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Processing,
    Applied,
    Failed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Received => "received",
            DeliveryState::Processing => "processing",
            DeliveryState::Applied => "applied",
            DeliveryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a delivery was settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Nacked; the broker will deliver it again.
    Redelivered,
    DeadLettered { reason: String },
}

#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    /// Deliveries allowed before a retryable failure is dead-lettered.
    /// 1 means the first failure dead-letters.
    pub max_attempts: u32,
    pub actuation_timeout: Duration,
    pub store_timeout: Duration,
    /// Pause after a receive or settle error before polling again.
    pub receive_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            actuation_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            receive_backoff: Duration::from_secs(1),
        }
    }
}

/// Why processing failed, and whether another delivery could help.
enum Failure {
    /// Malformed payload or missing target: redelivery cannot succeed.
    Terminal(String),
    /// Store or actuator trouble: a later attempt may succeed.
    Retryable(String),
}

pub struct CommandConsumer<E: Record> {
    store: Arc<dyn StateStore<E>>,
    queue: Arc<dyn CommandQueue>,
    actuator: Arc<dyn Actuator>,
    settings: ConsumerSettings,
}

impl<E: Record> CommandConsumer<E> {
    pub fn new(
        store: Arc<dyn StateStore<E>>,
        queue: Arc<dyn CommandQueue>,
        actuator: Arc<dyn Actuator>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            actuator,
            settings,
        }
    }

    /// Consume until the queue reports it is closed.
    pub async fn run(self) {
        info!(collection = E::COLLECTION, "Command consumer started");

        loop {
            let delivery = match self.queue.receive().await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    error!(collection = E::COLLECTION, error = %e, "Error receiving command");
                    tokio::time::sleep(self.settings.receive_backoff).await;
                    continue;
                }
            };

            if let Err(e) = self.handle(delivery).await {
                error!(collection = E::COLLECTION, error = %e, "Failed to settle delivery");
                tokio::time::sleep(self.settings.receive_backoff).await;
            }
        }

        warn!(collection = E::COLLECTION, "Command consumer stream ended");
    }

    /// Process and settle a single delivery.
    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome, QueueError> {
        trace_state(&delivery, DeliveryState::Received);

        let envelope = match CommandEnvelope::from_bytes(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                return self
                    .fail(&delivery, Failure::Terminal(format!("malformed envelope: {}", e)))
                    .await;
            }
        };

        trace_state(&delivery, DeliveryState::Processing);

        if let Err(failure) = self.process(&envelope).await {
            return self.fail(&delivery, failure).await;
        }

        delivery.ack().await?;
        trace_state(&delivery, DeliveryState::Applied);
        info!(
            command_id = %envelope.command_id,
            entity_id = %envelope.target_entity_id,
            action = %envelope.action,
            "Command applied"
        );
        Ok(Outcome::Applied)
    }

    async fn process(&self, envelope: &CommandEnvelope) -> Result<(), Failure> {
        self.revalidate(envelope).await?;

        match tokio::time::timeout(
            self.settings.actuation_timeout,
            self.actuator.apply(envelope),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Failure::Retryable(e.to_string())),
            Err(_) => Err(Failure::Retryable(ActuatorError::Timeout.to_string())),
        }
    }

    /// The target may have been deleted since dispatch.
    async fn revalidate(&self, envelope: &CommandEnvelope) -> Result<(), Failure> {
        let found = tokio::time::timeout(
            self.settings.store_timeout,
            self.store.find_by_id(&envelope.target_entity_id),
        )
        .await
        .map_err(|_| Failure::Retryable("state store timed out".to_string()))?
        .map_err(|e| Failure::Retryable(e.to_string()))?;

        let Some(entity) = found else {
            return Err(Failure::Terminal(format!(
                "target {}:{} no longer exists",
                E::COLLECTION,
                envelope.target_entity_id
            )));
        };

        let kind = target_kind(&entity, envelope.target_sub_entity_id.as_deref())
            .map_err(|e| Failure::Terminal(e.to_string()))?;

        if kind != envelope.target_kind {
            return Err(Failure::Terminal(format!(
                "envelope targets {} but record resolves to {}",
                envelope.target_kind, kind
            )));
        }

        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, failure: Failure) -> Result<Outcome, QueueError> {
        trace_state(delivery, DeliveryState::Failed);

        let reason = match failure {
            Failure::Retryable(reason) if delivery.attempt < self.settings.max_attempts => {
                warn!(
                    key = %delivery.key,
                    attempt = delivery.attempt,
                    max_attempts = self.settings.max_attempts,
                    reason = %reason,
                    "Command failed, requesting redelivery"
                );
                delivery.nack().await?;
                return Ok(Outcome::Redelivered);
            }
            Failure::Retryable(reason) | Failure::Terminal(reason) => reason,
        };

        let letter = DeadLetter::new(&delivery.key, &delivery.payload, &reason, delivery.attempt);

        if let Err(e) = self.queue.dead_letter(&letter).await {
            // Handed back to the broker; the next delivery retries the dead letter
            error!(key = %delivery.key, error = %e, "Dead-letter publish failed");
            delivery.nack().await?;
            return Err(e);
        }

        delivery.ack().await?;
        warn!(
            key = %delivery.key,
            attempts = delivery.attempt,
            reason = %reason,
            "Command dead-lettered"
        );
        Ok(Outcome::DeadLettered { reason })
    }
}

fn trace_state(delivery: &Delivery, state: DeliveryState) {
    debug!(key = %delivery.key, attempt = delivery.attempt, state = %state, "Delivery state");
}
