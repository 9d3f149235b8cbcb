//! Structured helpers for deadline-bounded work.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// Runs `future` under `deadline`, mapping expiry to [`AppError::Timeout`].
///
/// The future is dropped when the deadline fires, so anything it holds
/// (lock guards included) is released through its `Drop`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            deadline.as_millis()
        ))),
    }
}

async fn joined<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(AppError::Canceled),
        Err(e) => Err(AppError::Internal(format!("Worker task failed: {}", e))),
    }
}

/// Runs two blocking units of work concurrently and joins them.
///
/// Resolves to both outputs, to the first error, or to
/// [`AppError::Timeout`] when `deadline` fires first. A partial result is
/// never returned.
pub async fn join_pair<A, B, FA, FB>(deadline: Duration, left: FA, right: FB) -> Result<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
    FA: FnOnce() -> Result<A> + Send + 'static,
    FB: FnOnce() -> Result<B> + Send + 'static,
{
    let left = tokio::task::spawn_blocking(left);
    let right = tokio::task::spawn_blocking(right);

    with_deadline(deadline, "paired operation", async {
        futures::try_join!(joined(left), joined(right))
    })
    .await
}
