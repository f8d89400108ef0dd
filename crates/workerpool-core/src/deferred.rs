use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::WorkerPoolError;

/// The settlement half of a [`Task`]. A `WorkerHandler` holds one of these
/// per in-flight task and calls `resolve`/`reject` exactly once, from
/// whichever code path settles the task first (a terminal response, a
/// transport failure, or forced termination).
#[derive(Debug)]
pub struct TaskResolver<T> {
    tx: Option<oneshot::Sender<Result<T, WorkerPoolError>>>,
}

impl<T> TaskResolver<T> {
    /// Settle the task successfully. A no-op if already settled.
    pub fn resolve(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(value));
        }
    }

    /// Settle the task with a failure. A no-op if already settled.
    pub fn reject(mut self, err: WorkerPoolError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// A single-settlement future, the Rust stand-in for the original's
/// deferred promise. Resolves or rejects exactly once (testable property
/// #1).
///
/// A `Task` built via [`Task::new_cancellable`] notifies a caller-supplied
/// channel with its id when dropped before being polled to completion —
/// this is how a `WorkerHandler` learns that a caller abandoned or timed
/// out a task (`with_timeout` drops the inner future on expiry, which goes
/// through the same path) and reacts per the termination-on-cancellation
/// policy in `SPEC_FULL.md` §5. A plain `Task::new()` task (used for
/// operations with no notion of an owning in-flight id, e.g.
/// `terminate_and_notify`) skips this entirely.
#[derive(Debug)]
pub struct Task<T> {
    rx: oneshot::Receiver<Result<T, WorkerPoolError>>,
    cancel: Option<(u64, mpsc::UnboundedSender<u64>)>,
}

impl<T> Task<T> {
    /// Create a resolver/task pair for one in-flight task.
    #[must_use]
    pub fn new() -> (TaskResolver<T>, Task<T>) {
        let (tx, rx) = oneshot::channel();
        (TaskResolver { tx: Some(tx) }, Task { rx, cancel: None })
    }

    /// Like [`Task::new`], but the returned `Task` reports `id` on
    /// `cancel_tx` if it is dropped before settling.
    #[must_use]
    pub fn new_cancellable(id: u64, cancel_tx: mpsc::UnboundedSender<u64>) -> (TaskResolver<T>, Task<T>) {
        let (tx, rx) = oneshot::channel();
        (
            TaskResolver { tx: Some(tx) },
            Task {
                rx,
                cancel: Some((id, cancel_tx)),
            },
        )
    }

    /// Await this task, but fail with [`WorkerPoolError::Timeout`] if it
    /// has not settled within `duration`. On expiry, the inner future
    /// (and with it any cancellation notice armed by
    /// [`Task::new_cancellable`]) is dropped, which is what lets a timed
    /// out task still trigger forced termination of its owning worker.
    pub async fn with_timeout(self, duration: Duration) -> Result<T, WorkerPoolError> {
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_elapsed) => Err(WorkerPoolError::Timeout),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, WorkerPoolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_canceled)) => Poll::Ready(Err(WorkerPoolError::Cancellation)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if let Some((id, cancel_tx)) = self.cancel.take() {
            let _ = cancel_tx.send(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_settles_future_exactly_once() {
        let (resolver, task) = Task::new();
        resolver.resolve(42u32);
        assert_eq!(task.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn reject_settles_future_with_error() {
        let (resolver, task) = Task::<u32>::new();
        resolver.reject(WorkerPoolError::WorkerTerminated);
        assert!(matches!(task.await, Err(WorkerPoolError::WorkerTerminated)));
    }

    #[tokio::test]
    async fn dropping_the_resolver_yields_cancellation() {
        let (resolver, task) = Task::<u32>::new();
        drop(resolver);
        assert!(matches!(task.await, Err(WorkerPoolError::Cancellation)));
    }

    #[tokio::test]
    async fn with_timeout_rejects_after_deadline() {
        let (_resolver, task) = Task::<u32>::new();
        let result = task.with_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(WorkerPoolError::Timeout)));
    }

    #[tokio::test]
    async fn with_timeout_resolves_before_deadline() {
        let (resolver, task) = Task::new();
        resolver.resolve(7u32);
        let result = task.with_timeout(Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropping_a_cancellable_task_reports_its_id() {
        let (cancel_tx, mut cancel_rx) = mpsc::unbounded_channel();
        let (_resolver, task) = Task::<u32>::new_cancellable(42, cancel_tx);
        drop(task);
        assert_eq!(cancel_rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn timing_out_a_cancellable_task_also_reports_its_id() {
        let (cancel_tx, mut cancel_rx) = mpsc::unbounded_channel();
        let (_resolver, task) = Task::<u32>::new_cancellable(7, cancel_tx);
        let result = task.with_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(WorkerPoolError::Timeout)));
        assert_eq!(cancel_rx.recv().await, Some(7));
    }
}
