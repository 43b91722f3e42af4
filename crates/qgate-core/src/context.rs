//! Deadline and cancellation propagation for blocking calls
//!
//! An [`ExecutionContext`] travels with a request from the HTTP handler or queue
//! consumer down into the connector. Every await point that may block on I/O is
//! wrapped with [`ExecutionContext::run`], which resolves early when either the
//! deadline passes or the cancellation token fires.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a guarded future did not run to completion
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// A context with no deadline and a fresh token
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Bind the context to an existing cancellation token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    /// Tighten the deadline; an earlier existing deadline wins
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Derive a child context; cancelling the parent cancels the child
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check the context without awaiting anything
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the deadline passes or the token fires
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    output = fut => Ok(output),
                    _ = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
                    _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
                }
            }
            None => {
                tokio::select! {
                    output = fut => Ok(output),
                    _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
                }
            }
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let ctx = ExecutionContext::with_timeout(Duration::from_secs(5));
        let value = ctx.run(async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_hits_deadline() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = ExecutionContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        let result = child.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(10))
            .timeout(Duration::from_secs(60));
        assert!(ctx.remaining().unwrap() <= Duration::from_millis(10));
    }
}
