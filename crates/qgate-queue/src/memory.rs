use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use qgate_core::{Acknowledger, Delivery, Disposition, JobQueue, JobReceiver, QueueError};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
struct Envelope {
    body: Vec<u8>,
    attempt: u32,
}

/// In-process queue with competing consumers
///
/// A delivery dropped without being settled goes back on the queue with its
/// attempt counter incremented, the way a broker redelivers after a consumer dies.
#[derive(Clone)]
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
    dead_letters: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: CancellationToken,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            closed: CancellationToken::new(),
        }
    }

    /// Stop handing out deliveries; receivers return `Ok(None)`
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Rejected payloads, oldest first
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.dead_letters.lock().clone()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::ChannelClosed);
        }
        self.sender
            .send(Envelope {
                body: payload.to_vec(),
                attempt: 1,
            })
            .map_err(|e| QueueError::PublishError(e.to_string()))?;
        debug!("Published {} bytes to memory queue", payload.len());
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn JobReceiver>, QueueError> {
        Ok(Box::new(MemoryReceiver {
            queue: self.clone(),
        }))
    }
}

struct MemoryReceiver {
    queue: MemoryQueue,
}

#[async_trait]
impl JobReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Delivery>, QueueError> {
        let envelope = {
            let mut receiver = self.queue.receiver.lock().await;
            tokio::select! {
                _ = self.queue.closed.cancelled() => None,
                envelope = receiver.recv() => envelope,
            }
        };

        Ok(envelope.map(|envelope| {
            let body = envelope.body.clone();
            let attempt = envelope.attempt;
            let acker = MemoryAcker {
                envelope: Some(envelope),
                sender: self.queue.sender.clone(),
                dead_letters: self.queue.dead_letters.clone(),
            };
            Delivery::new(body, attempt, Box::new(acker))
        }))
    }
}

struct MemoryAcker {
    envelope: Option<Envelope>,
    sender: mpsc::UnboundedSender<Envelope>,
    dead_letters: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryAcker {
    fn requeue(&self, envelope: Envelope) -> Result<(), QueueError> {
        self.sender
            .send(Envelope {
                body: envelope.body,
                attempt: envelope.attempt + 1,
            })
            .map_err(|_| QueueError::ChannelClosed)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), QueueError> {
        let mut this = self;
        let Some(envelope) = this.envelope.take() else {
            return Ok(());
        };

        match disposition {
            Disposition::Ack => Ok(()),
            Disposition::Requeue => this.requeue(envelope),
            Disposition::Reject => {
                this.dead_letters.lock().push(envelope.body);
                Ok(())
            }
        }
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            warn!(
                "Delivery dropped without settlement, redelivering (attempt {})",
                envelope.attempt + 1
            );
            let _ = self.requeue(envelope);
        }
    }
}
