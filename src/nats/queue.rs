use super::NatsConfig;
use crate::command::{CommandEnvelope, DeadLetter};
use crate::error::QueueError;
use crate::queue::{Acknowledger, CommandQueue, Delivery};
use async_nats::jetstream::{self, consumer::pull, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Header carrying the partition key (the target entity id).
pub const KEY_HEADER: &str = "City-Command-Key";

/// JetStream `max_deliver` value for "no limit".
const UNLIMITED_DELIVERIES: i64 = -1;

/// JetStream-backed command channel for one collection.
///
/// The pull consumer is durable and shared by every handle for the same
/// collection, so several workers can each hold their own `NatsQueue`.
/// Redelivery is unbounded on the broker side: the consumer counts attempts
/// and decides when to dead-letter, so a nack always comes back.
pub struct NatsQueue {
    jetstream: jetstream::Context,
    stream_name: String,
    subject: String,
    dead_letter_subject: String,
    durable_name: String,
    ack_wait: Duration,
    messages: Mutex<Option<pull::Stream>>,
}

impl NatsQueue {
    pub(crate) fn new(
        jetstream: jetstream::Context,
        config: &NatsConfig,
        collection: &str,
    ) -> Self {
        Self {
            jetstream,
            stream_name: config.stream_name.clone(),
            subject: config.command_subject(collection),
            dead_letter_subject: config.dead_letter_subject(collection),
            durable_name: format!("city-{}-consumer", collection),
            ack_wait: Duration::from_secs(config.ack_wait_secs),
            messages: Mutex::new(None),
        }
    }

    async fn open_messages(&self) -> Result<pull::Stream, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.durable_name,
                pull::Config {
                    durable_name: Some(self.durable_name.clone()),
                    filter_subject: self.subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_deliver: UNLIMITED_DELIVERIES,
                    ack_wait: self.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!(
            consumer = %self.durable_name,
            subject = %self.subject,
            "Command consumer attached"
        );

        consumer
            .messages()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    async fn publish_bytes(
        &self,
        subject: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, key);

        self.jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl CommandQueue for NatsQueue {
    async fn publish(&self, key: &str, envelope: &CommandEnvelope) -> Result<(), QueueError> {
        let payload = envelope
            .to_bytes()
            .map_err(|e| QueueError::Serialisation(e.to_string()))?;

        debug!(
            subject = %self.subject,
            key = %key,
            command_id = %envelope.command_id,
            "Publishing command to NATS"
        );

        self.publish_bytes(&self.subject, key, payload).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut guard = self.messages.lock().await;

        if guard.is_none() {
            *guard = Some(self.open_messages().await?);
        }

        let Some(messages) = guard.as_mut() else {
            return Err(QueueError::Closed);
        };

        let next = messages.next().await;
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(QueueError::Connection(e.to_string())),
            None => {
                // Reattached on the next receive
                *guard = None;
                return Err(QueueError::Connection("message stream ended".to_string()));
            }
        };

        let attempt = match msg.info() {
            Ok(info) => u32::try_from(info.delivered).unwrap_or(u32::MAX).max(1),
            Err(e) => {
                error!(error = %e, "Failed to get message info");
                1
            }
        };

        let key = msg
            .headers
            .as_ref()
            .and_then(|h| h.get(KEY_HEADER))
            .map(|v| v.as_str().to_string())
            .unwrap_or_default();
        let payload = msg.payload.to_vec();

        Ok(Some(Delivery::new(key, payload, attempt, NatsAcker { msg })))
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(letter).map_err(|e| QueueError::Serialisation(e.to_string()))?;
        self.publish_bytes(&self.dead_letter_subject, &letter.key, payload)
            .await
    }
}

struct NatsAcker {
    msg: jetstream::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.msg
            .ack()
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(&self) -> Result<(), QueueError> {
        self.msg
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}
