use crate::command::CommandEnvelope;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuation failed: {0}")]
    Failed(String),

    #[error("actuation timed out")]
    Timeout,
}

/// Performs the side effect a command asks for (device driver call,
/// downstream notification).
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn apply(&self, envelope: &CommandEnvelope) -> Result<(), ActuatorError>;
}

/// Records the command in the log and reports success.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogActuator;

#[async_trait]
impl Actuator for LogActuator {
    async fn apply(&self, envelope: &CommandEnvelope) -> Result<(), ActuatorError> {
        info!(
            command_id = %envelope.command_id,
            target = %envelope.target_kind,
            entity_id = %envelope.target_entity_id,
            sub_entity_id = envelope.target_sub_entity_id.as_deref().unwrap_or("-"),
            action = %envelope.action,
            value = ?envelope.value,
            "Actuating command"
        );
        Ok(())
    }
}
