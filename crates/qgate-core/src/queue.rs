//! Transport-agnostic queue contracts
//!
//! Transports live in `qgate-queue`; job semantics live in `qgate-jobs`.
//! This module only fixes the shape of a delivery and how it is settled.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::ExecutionContext;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Failed to publish message: {0}")]
    PublishError(String),
    #[error("Failed to receive message: {0}")]
    ReceiveError(String),
    #[error("Failed to settle message: {0}")]
    SettleError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
    #[error("Invalid message data: {0}")]
    InvalidData(String),
}

/// What a handler wants done with a delivery once it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Ack,
    /// Negative-acknowledge and redeliver with the attempt counter incremented
    Requeue,
    /// Negative-acknowledge without redelivery (dead-letter)
    Reject,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Ack => write!(f, "ack"),
            Disposition::Requeue => write!(f, "requeue"),
            Disposition::Reject => write!(f, "reject"),
        }
    }
}

/// Transport-specific settlement of one delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn settle(self: Box<Self>, disposition: Disposition) -> Result<(), QueueError>;
}

/// A message handed to a consumer; must be settled exactly once
pub struct Delivery {
    body: Vec<u8>,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// `attempt` starts at 1 for the first delivery
    pub fn new(body: Vec<u8>, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            body,
            attempt: attempt.max(1),
            acker,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub async fn settle(self, disposition: Disposition) -> Result<(), QueueError> {
        self.acker.settle(disposition).await
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.settle(Disposition::Ack).await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        let disposition = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Reject
        };
        self.settle(disposition).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.body.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Core trait for durable publish/subscribe of opaque payloads
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Open a new consuming stream
    async fn subscribe(&self) -> Result<Box<dyn JobReceiver>, QueueError>;
}

#[async_trait]
pub trait JobReceiver: Send {
    /// Next delivery; `Ok(None)` once the stream has closed
    async fn recv(&mut self) -> Result<Option<Delivery>, QueueError>;
}

/// Business logic invoked for each delivery by a consumer loop
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, body: &[u8], attempt: u32, ctx: &ExecutionContext) -> Disposition;

    /// Called when `handle` overran the consumer timeout and was dropped;
    /// `disposition` is how the consumer is about to settle the delivery
    async fn on_timeout(&self, _body: &[u8], _attempt: u32, _disposition: Disposition) {}
}
