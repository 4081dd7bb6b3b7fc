use super::{Acknowledger, CommandQueue, Delivery};
use crate::command::{CommandEnvelope, DeadLetter};
use crate::error::QueueError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
struct Pending {
    key: String,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<VecDeque<Pending>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    notify: Notify,
    closed: AtomicBool,
    unavailable: AtomicBool,
}

impl Inner {
    fn pending(&self) -> Result<MutexGuard<'_, VecDeque<Pending>>, QueueError> {
        self.pending
            .lock()
            .map_err(|_| QueueError::Connection("queue mutex poisoned".to_string()))
    }
}

/// In-process FIFO queue.
///
/// A single FIFO keeps publish order for every key. A nacked message goes
/// back to the head of the queue so it is retried before anything published
/// after it.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue raw bytes, bypassing envelope encoding.
    pub fn push_raw(&self, key: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.inner.pending()?.push_back(Pending {
            key: key.to_string(),
            payload: payload.to_vec(),
            attempt: 1,
        });
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Messages waiting for a consumer.
    pub fn len(&self) -> usize {
        self.inner.pending().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded envelopes still waiting, in delivery order.
    pub fn pending_envelopes(&self) -> Vec<CommandEnvelope> {
        self.inner
            .pending()
            .map(|p| {
                p.iter()
                    .filter_map(|m| CommandEnvelope::from_bytes(&m.payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner
            .dead_letters
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Simulate a broker outage: publishes fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Stop handing out deliveries once the queue drains.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl CommandQueue for MemoryQueue {
    async fn publish(&self, key: &str, envelope: &CommandEnvelope) -> Result<(), QueueError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("broker unavailable".to_string()));
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let payload = envelope
            .to_bytes()
            .map_err(|e| QueueError::Serialisation(e.to_string()))?;
        self.push_raw(key, &payload)?;

        debug!(key = %key, command_id = %envelope.command_id, "Queued command");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            // Register interest before checking so a concurrent publish/close is not missed
            let notified = self.inner.notify.notified();

            let next = self.inner.pending()?.pop_front();
            if let Some(next) = next {
                let acker = MemoryAcker {
                    inner: Arc::clone(&self.inner),
                    message: next.clone(),
                };
                return Ok(Some(Delivery::new(
                    next.key,
                    next.payload,
                    next.attempt,
                    acker,
                )));
            }

            if self.inner.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            notified.await;
        }
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), QueueError> {
        self.inner
            .dead_letters
            .lock()
            .map_err(|_| QueueError::Connection("queue mutex poisoned".to_string()))?
            .push(letter.clone());
        Ok(())
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    message: Pending,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn nack(&self) -> Result<(), QueueError> {
        let mut redelivery = self.message.clone();
        redelivery.attempt += 1;
        self.inner.pending()?.push_front(redelivery);
        self.inner.notify.notify_one();
        Ok(())
    }
}
