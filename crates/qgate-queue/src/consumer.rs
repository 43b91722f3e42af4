//! Consumer loop shared by every transport
//!
//! One long-lived task pulls deliveries from a [`JobReceiver`] and hands each to
//! its own task, bounded by `max_in_flight`. A delivery is handled under an
//! [`ExecutionContext`] carrying the message timeout and a child of the
//! consumer's cancellation token. If the handler overruns the timeout anyway the
//! backstop requeues the delivery, or dead-letters it on the last attempt.

use std::sync::Arc;
use std::time::Duration;

use qgate_core::{DeliveryHandler, Disposition, ExecutionContext, JobQueue, QueueError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Upper bound for handling one delivery
    pub message_timeout: Duration,
    /// Deliveries handled concurrently
    pub max_in_flight: usize,
    /// Attempt at which a delivery that overran the timeout is rejected
    pub max_attempts: u32,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(30),
            max_in_flight: 16,
            max_attempts: 5,
        }
    }
}

pub struct Consumer {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn DeliveryHandler>,
    options: ConsumerOptions,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            queue,
            handler,
            options,
        }
    }

    /// Consume until `cancel` fires or the stream closes
    ///
    /// Deliveries already dispatched are awaited before returning. Their
    /// contexts are cancelled together with `cancel`, so handlers see the
    /// shutdown and settle promptly.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        let mut receiver = self.queue.subscribe().await?;
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut backoff = INITIAL_BACKOFF;

        info!(
            max_in_flight = self.options.max_in_flight,
            timeout_secs = self.options.message_timeout.as_secs(),
            "Consumer started"
        );

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!("Delivery task panicked: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = receiver.recv() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    backoff = INITIAL_BACKOFF;
                    debug!(attempt = delivery.attempt(), "Dispatching delivery");
                    let ctx = ExecutionContext::with_token(cancel.child_token())
                        .timeout(self.options.message_timeout);
                    tasks.spawn(dispatch(
                        self.handler.clone(),
                        delivery,
                        ctx,
                        self.options.clone(),
                        permit,
                    ));
                }
                Ok(None) => {
                    info!("Queue stream closed");
                    break;
                }
                Err(e) => {
                    warn!("Receive failed, retrying in {:?}: {}", backoff, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight deliveries", tasks.len());
        }
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Delivery task panicked: {}", e);
            }
        }

        info!("Consumer stopped");
        Ok(())
    }
}

async fn dispatch(
    handler: Arc<dyn DeliveryHandler>,
    delivery: qgate_core::Delivery,
    ctx: ExecutionContext,
    options: ConsumerOptions,
    _permit: OwnedSemaphorePermit,
) {
    let attempt = delivery.attempt();
    let timeout = options.message_timeout;

    let disposition =
        match tokio::time::timeout(timeout, handler.handle(delivery.body(), attempt, &ctx)).await {
            Ok(disposition) => disposition,
            Err(_) => {
                let disposition = backstop(attempt, options.max_attempts);
                warn!(attempt, %disposition, "Handler exceeded {:?}", timeout);
                handler.on_timeout(delivery.body(), attempt, disposition).await;
                disposition
            }
        };

    if let Err(e) = delivery.settle(disposition).await {
        error!(attempt, %disposition, "Failed to settle delivery: {}", e);
    }
}

/// Settlement for a delivery whose handler never returned
fn backstop(attempt: u32, max_attempts: u32) -> Disposition {
    if attempt < max_attempts.max(1) {
        Disposition::Requeue
    } else {
        Disposition::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backstop_is_bounded() {
        assert_eq!(backstop(1, 3), Disposition::Requeue);
        assert_eq!(backstop(2, 3), Disposition::Requeue);
        assert_eq!(backstop(3, 3), Disposition::Reject);
        assert_eq!(backstop(7, 3), Disposition::Reject);
        assert_eq!(backstop(1, 0), Disposition::Reject);
    }
}
