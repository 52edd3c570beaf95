//! Caller-owned request context.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vertex_swarm_api::CancelReason;

/// A caller's interest in a chunk: cancellable, optionally with a deadline.
///
/// Cancelling one request never affects other callers waiting for the same
/// chunk.
#[derive(Debug, Clone, Default)]
pub struct Request {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Request {
    /// A request that only ends when cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request that gives up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    /// A request bound to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Set the deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancel the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The token cancelling this request.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the request was cancelled or its deadline passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves when the request ends, with the reason it ended.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => CancelReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }
}
