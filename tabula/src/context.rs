//! Cancellable execution context
//!
//! Every repository and migration call takes a [`Context`]. The context races
//! the in-flight backend future against its cancellation token and optional
//! deadline; whichever finishes first wins.
//!
//! Cancellation is not a rollback. If a write is cancelled after the backend
//! has committed it, the write stays committed: the caller sees
//! [`ExecutorErrorKind::Cancelled`](crate::executor::ExecutorErrorKind::Cancelled)
//! and must treat the outcome as unknown.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutorError, ExecutorOperation, ExecutorResult};

/// Cancellation signal plus optional deadline, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Limit the context to `timeout` from now. An earlier existing deadline wins.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Limit the context to an absolute deadline. An earlier existing deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// A child context: cancelled when this one is, but cancelling it leaves the parent alone
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context was cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast with a cancellation error if the context is already done
    pub fn check(&self, operation: ExecutorOperation) -> ExecutorResult<()> {
        if self.token.is_cancelled() {
            return Err(ExecutorError::cancelled(operation, "context cancelled"));
        }
        if self.deadline.is_some_and(|at| Instant::now() >= at) {
            return Err(ExecutorError::cancelled(operation, "context deadline exceeded"));
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled first.
    ///
    /// On cancellation the future is dropped, aborting the in-flight backend call.
    pub async fn run<T, F>(&self, operation: ExecutorOperation, fut: F) -> ExecutorResult<T>
    where
        F: Future<Output = ExecutorResult<T>>,
    {
        self.check(operation)?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                Err(ExecutorError::cancelled(operation, "context cancelled"))
            }
            _ = deadline => {
                Err(ExecutorError::cancelled(operation, "context deadline exceeded"))
            }
            result = fut => result,
        }
    }
}
