//! Command dispatcher.
//!
//! `submit` checks that the target exists, validates the action for the
//! target's kind, builds a [`CommandEnvelope`] and publishes it keyed by the
//! entity id. Acceptance only means the command was durably queued. There
//! is no local retry; a failed publish is returned to the caller.

use crate::command::{ActionRegistry, CommandEnvelope};
use crate::error::{CityError, QueueError, StoreError};
use crate::model::{Record, TargetKind};
use crate::queue::CommandQueue;
use crate::store::StateStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct DispatchTimeouts {
    pub store: Duration,
    pub publish: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(5),
            publish: Duration::from_secs(5),
        }
    }
}

pub struct Dispatcher<E: Record> {
    store: Arc<dyn StateStore<E>>,
    queue: Arc<dyn CommandQueue>,
    registry: Arc<ActionRegistry>,
    timeouts: DispatchTimeouts,
}

impl<E: Record> Dispatcher<E> {
    pub fn new(
        store: Arc<dyn StateStore<E>>,
        queue: Arc<dyn CommandQueue>,
        registry: Arc<ActionRegistry>,
        timeouts: DispatchTimeouts,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            timeouts,
        }
    }

    /// Validate and enqueue a command.
    ///
    /// `sub_entity_id` targets a sub-entity of the record (a device within a
    /// house); the action is then validated against the sub-entity's kind.
    pub async fn submit(
        &self,
        entity_id: &str,
        sub_entity_id: Option<&str>,
        action: &str,
        value: Option<f64>,
    ) -> Result<CommandEnvelope, CityError> {
        // The existence check reads the store directly; the consumer
        // re-validates before applying, so a concurrent delete is tolerated.
        let entity = self
            .bounded_store(self.store.find_by_id(entity_id))
            .await?
            .ok_or_else(|| CityError::NotFound(format!("{}:{}", E::COLLECTION, entity_id)))?;

        let kind = target_kind(&entity, sub_entity_id)?;
        let action = self.registry.validate(kind, action, value)?;

        let envelope = CommandEnvelope::new(kind, entity_id, sub_entity_id, action, value);

        match tokio::time::timeout(
            self.timeouts.publish,
            self.queue.publish(entity_id, &envelope),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(entity_id = %entity_id, error = %e, "Command publish failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(entity_id = %entity_id, "Command publish timed out");
                return Err(QueueError::Timeout.into());
            }
        }

        info!(
            command_id = %envelope.command_id,
            target = %kind,
            entity_id = %entity_id,
            sub_entity_id = sub_entity_id.unwrap_or("-"),
            action = %action,
            "Command accepted"
        );

        Ok(envelope)
    }

    async fn bounded_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CityError> {
        match tokio::time::timeout(self.timeouts.store, call).await {
            Ok(result) => result.map_err(CityError::from),
            Err(_) => {
                debug!(collection = E::COLLECTION, "Existence check timed out");
                Err(StoreError::Timeout.into())
            }
        }
    }
}

/// Resolve which kind of target a command addresses, checking the
/// sub-entity exists on the record when one is named.
pub(crate) fn target_kind<E: Record>(
    entity: &E,
    sub_entity_id: Option<&str>,
) -> Result<TargetKind, CityError> {
    let Some(sub_id) = sub_entity_id else {
        return Ok(E::KIND);
    };

    let Some(sub_kind) = E::SUB_KIND else {
        return Err(CityError::InvalidAction(format!(
            "{} records have no addressable sub-entities",
            E::KIND
        )));
    };

    if entity.has_sub_entity(sub_id) {
        Ok(sub_kind)
    } else {
        Err(CityError::NotFound(format!(
            "{}:{}/{}",
            E::COLLECTION,
            entity.id(),
            sub_id
        )))
    }
}
