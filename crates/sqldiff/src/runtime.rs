//! Bounded concurrency for the diffing engine.
//!
//! Two independent pools exist, one per database side, because per-connection
//! concurrency is the scarce resource. A checksum task takes one slot on its
//! side; a local-fetch task takes a slot on each side, always acquired in
//! side order (left, then right) so two fetch tasks can never deadlock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{DiffError, Result};

/// Which database side a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Per-side worker pools.
#[derive(Clone)]
pub struct SidePools {
    left: Arc<Semaphore>,
    right: Arc<Semaphore>,
}

impl SidePools {
    /// `threads_per_side` slots on each side (the `-j/--threads` setting).
    pub fn new(left_threads: usize, right_threads: usize) -> Self {
        Self {
            left: Arc::new(Semaphore::new(left_threads.max(1))),
            right: Arc::new(Semaphore::new(right_threads.max(1))),
        }
    }

    fn semaphore(&self, side: Side) -> &Arc<Semaphore> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// One slot on the given side.
    pub async fn acquire(&self, side: Side) -> Result<OwnedSemaphorePermit> {
        Arc::clone(self.semaphore(side))
            .acquire_owned()
            .await
            .map_err(|_| DiffError::Cancelled)
    }

    /// One slot on each side, in deterministic side order.
    pub async fn acquire_both(&self) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let left = self.acquire(Side::Left).await?;
        let right = self.acquire(Side::Right).await?;
        Ok((left, right))
    }
}

/// Retry delays for transient backend failures.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(500)];

/// Run an operation, retrying transient failures with the fixed delay
/// schedule. A timed-out query counts as a transient failure. Cancellation
/// aborts between attempts and while waiting.
pub async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }

        let attempt_future = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(DiffError::transient(format!(
                        "{} timed out after {:?}",
                        what, limit
                    ))),
                },
                None => operation().await,
            }
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DiffError::Cancelled),
            r = attempt_future => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < RETRY_DELAYS.len() => {
                warn!(what, attempt, error = %e, "transient failure, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DiffError::Cancelled),
                    _ = tokio::time::sleep(RETRY_DELAYS[attempt]) => {}
                }
                attempt += 1;
            }
            Err(DiffError::Cancelled) => return Err(DiffError::Cancelled),
            Err(e) if attempt >= RETRY_DELAYS.len() => {
                // Exhausted retries: surface as a fatal backend error
                return Err(DiffError::backend(format!("{}: {}", what, e)));
            }
            Err(e) => return Err(e),
        }
    }
}
