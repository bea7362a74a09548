//! Bounded task queue
//!
//! Runs a list of tasks with at most `concurrency` of them in flight. When a
//! task finishes the next one from the backlog is started in its place, so
//! the window stays full until the backlog drains.
//!
//! A task is anything `FnOnce() -> impl Future<Output = Result<T, E>>`. The
//! future is only created when the queue starts the task, which is what keeps
//! the bound honest: a caller cannot hand over work that is already running.
//!
//! Results are collected in completion order, not submission order.
//!
//! The first failing task settles the queue with that error and the remaining
//! in-flight futures are dropped. Each run works under a child of the queue's
//! [`CancellationToken`]; the failure cancels only that child, so tasks started
//! through [`TaskQueue::run_with_token`] can stop work they spawned, and the
//! queue itself stays usable for the next run.
//!
//! Tasks are polled on the caller's task rather than spawned, so the in-flight
//! counter and the result accumulator are only ever touched from one place and
//! need no locking.

use crate::error::{Result, SyncError};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const ZERO_CONCURRENCY: &str = "task queue concurrency must be at least 1";

/// How a queue or pipeline run failed to complete
#[derive(Debug, Error)]
pub enum QueueError<E> {
    /// A task failed; the queue settled with its error
    #[error("task failed: {0}")]
    Task(E),

    /// The queue's token was cancelled from outside
    #[error("queue cancelled before all tasks completed")]
    Cancelled,

    /// The queue was configured with arguments no caller should pass
    #[error("caller contract violated: {0}")]
    Contract(String),
}

impl<E> QueueError<E> {
    /// The task error, if a task is what failed
    pub fn into_task_error(self) -> Option<E> {
        match self {
            QueueError::Task(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<QueueError<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(err: QueueError<E>) -> Self {
        match err {
            QueueError::Task(e) => e.into(),
            QueueError::Cancelled => SyncError::Cancelled,
            QueueError::Contract(msg) => SyncError::CallerContract(msg),
        }
    }
}

/// Executes tasks with a fixed concurrency ceiling
#[derive(Debug, Clone)]
pub struct TaskQueue {
    concurrency: usize,
    cancel: CancellationToken,
}

impl TaskQueue {
    /// Create a queue that keeps at most `concurrency` tasks in flight
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(SyncError::caller_contract(ZERO_CONCURRENCY));
        }

        Ok(Self {
            concurrency,
            cancel: CancellationToken::new(),
        })
    }

    /// Use `token` instead of the queue's own cancellation token
    ///
    /// The token is cancelled on the first task failure, and cancelling it
    /// from outside settles a running queue with [`QueueError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Maximum number of tasks a run keeps in flight
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Token that settles current and later runs with [`QueueError::Cancelled`]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every task, keeping at most `concurrency` in flight
    ///
    /// Resolves with one result per task, in the order they finished. An empty
    /// task list resolves immediately. A task that never completes keeps the
    /// queue pending.
    pub async fn run<I, F, Fut, T, E>(&self, tasks: I) -> std::result::Result<Vec<T>, QueueError<E>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.run_with_token(tasks.into_iter().map(|task| move |_: CancellationToken| task()))
            .await
    }

    /// Like [`TaskQueue::run`], handing each task the token of this run
    ///
    /// The token is cancelled when a sibling task fails or when the queue's
    /// own token is cancelled.
    pub async fn run_with_token<I, F, Fut, T, E>(
        &self,
        tasks: I,
    ) -> std::result::Result<Vec<T>, QueueError<E>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let tasks: Vec<F> = tasks.into_iter().collect();
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let run_token = self.cancel.child_token();
        if run_token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let width = self.concurrency.min(total);
        let mut backlog = tasks.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::with_capacity(total);

        debug!(total, width, "Starting task queue");

        for task in backlog.by_ref().take(width) {
            in_flight.push(task(run_token.clone()));
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = run_token.cancelled() => {
                    debug!(completed = results.len(), total, "Task queue cancelled");
                    return Err(QueueError::Cancelled);
                },
                next = in_flight.next() => next,
            };

            match next {
                Some(Ok(value)) => {
                    results.push(value);
                    if let Some(task) = backlog.next() {
                        in_flight.push(task(run_token.clone()));
                    }
                    trace!(
                        completed = results.len(),
                        in_flight = in_flight.len(),
                        total,
                        "Task completed"
                    );
                },
                Some(Err(err)) => {
                    debug!(
                        completed = results.len(),
                        abandoned = in_flight.len(),
                        total,
                        "Task failed, settling queue"
                    );
                    run_token.cancel();
                    return Err(QueueError::Task(err));
                },
                None => break,
            }
        }

        debug!(total, "Task queue drained");
        Ok(results)
    }
}

/// Run `tasks` with at most `concurrency` in flight
///
/// Shorthand for [`TaskQueue::new`] followed by [`TaskQueue::run`].
pub async fn run_queue<I, F, Fut, T, E>(
    tasks: I,
    concurrency: usize,
) -> std::result::Result<Vec<T>, QueueError<E>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let queue =
        TaskQueue::new(concurrency).map_err(|_| QueueError::Contract(ZERO_CONCURRENCY.to_string()))?;
    queue.run(tasks).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Varied but deterministic task durations
    fn delay(i: usize) -> Duration {
        Duration::from_millis(((i * 37) % 11 + 1) as u64 * 5)
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency_token_pool() {
        for (total, concurrency) in [(20, 3), (7, 7), (12, 1), (30, 8)] {
            let pool = Arc::new(Mutex::new(concurrency));
            let tasks = (0..total).map(|i| {
                let pool = pool.clone();
                move || async move {
                    {
                        let mut tokens = pool.lock().unwrap();
                        if *tokens == 0 {
                            return Err(format!("task {} started with an empty pool", i));
                        }
                        *tokens -= 1;
                    }
                    sleep(delay(i)).await;
                    *pool.lock().unwrap() += 1;
                    Ok(i)
                }
            });

            let results = run_queue(tasks, concurrency).await.unwrap();
            assert_eq!(results.len(), total);
            assert_eq!(*pool.lock().unwrap(), concurrency);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_refilled_as_slots_free() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|i| {
            let running = running.clone();
            let peak = peak.clone();
            move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(delay(i)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(i)
            }
        });

        run_queue(tasks, 4).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_list_resolves_empty() {
        let tasks: Vec<fn() -> std::future::Ready<std::result::Result<u8, ()>>> = Vec::new();
        let results = run_queue(tasks, 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_above_task_count_starts_everything() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks = (0..3).map(|_| {
            let started = started.clone();
            move || async move {
                started.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                Ok::<_, ()>(started.load(Ordering::SeqCst))
            }
        });

        // Every task sees all three started before any finishes.
        let results = run_queue(tasks, 100).await.unwrap();
        assert_eq!(results, vec![3, 3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let durations = [30u64, 10, 20];
        let tasks = durations.iter().enumerate().map(|(i, ms)| {
            let ms = *ms;
            move || async move {
                sleep(Duration::from_millis(ms)).await;
                Ok::<_, ()>(i)
            }
        });

        let results = run_queue(tasks, 3).await.unwrap();
        assert_eq!(results, vec![1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_propagates_from_any_position() {
        for failing in 0..6 {
            let tasks = (0..6).map(|i| {
                move || async move {
                    sleep(delay(i)).await;
                    if i == failing {
                        Err(format!("boom at {}", i))
                    } else {
                        Ok(i)
                    }
                }
            });

            let err = run_queue(tasks, 2).await.unwrap_err();
            assert_eq!(err.into_task_error(), Some(format!("boom at {}", failing)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cancels_run_token() {
        let queue = TaskQueue::new(2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let tasks = (0..4).map(|i| {
            let seen = seen.clone();
            move |token: CancellationToken| async move {
                seen.lock().unwrap().push(token.clone());
                if i == 1 {
                    sleep(Duration::from_millis(10)).await;
                    Err("write refused")
                } else {
                    sleep(Duration::from_secs(60)).await;
                    Ok(i)
                }
            }
        });

        let result = queue.run_with_token(tasks).await;
        assert!(matches!(result, Err(QueueError::Task("write refused"))));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(CancellationToken::is_cancelled));
        assert!(!queue.cancellation_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_is_reusable_after_failure() {
        let queue = TaskQueue::new(2).unwrap();

        let failing = (0..3).map(|i| move || async move {
            if i == 0 {
                Err("boom")
            } else {
                sleep(Duration::from_millis(10)).await;
                Ok(i)
            }
        });
        assert!(queue.run(failing).await.is_err());

        let healthy = (0..3).map(|i| move || async move {
            sleep(delay(i)).await;
            Ok::<_, &str>(i)
        });
        let mut results = queue.clone().run(healthy).await.unwrap();
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 2]);
        assert_eq!(queue.concurrency(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_task_keeps_queue_pending() {
        let tasks = (0..3).map(|i| move || async move {
            if i == 0 {
                std::future::pending::<()>().await;
            }
            Ok::<_, ()>(i)
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), run_queue(tasks, 2)).await;
        assert!(outcome.is_err(), "queue settled while a task was still pending");
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_settles_queue() {
        let token = CancellationToken::new();
        let queue = TaskQueue::new(2).unwrap().with_cancellation(token.clone());

        let tasks = (0..4).map(|i| move || async move {
            sleep(Duration::from_secs(10)).await;
            Ok::<_, ()>(i)
        });

        let canceller = async {
            sleep(Duration::from_secs(1)).await;
            token.cancel();
        };

        let (result, ()) = tokio::join!(queue.run(tasks), canceller);
        assert!(matches!(result, Err(QueueError::Cancelled)));
    }

    #[test]
    fn test_zero_concurrency_is_contract_error() {
        assert!(matches!(
            TaskQueue::new(0),
            Err(SyncError::CallerContract(_))
        ));
    }

    #[tokio::test]
    async fn test_run_queue_zero_concurrency() {
        let tasks = vec![|| async { Ok::<_, ()>(1) }];
        assert!(matches!(run_queue(tasks, 0).await, Err(QueueError::Contract(_))));
    }

    #[test]
    fn test_queue_error_converts_to_sync_error() {
        let err: SyncError = QueueError::Task(SyncError::auth("denied")).into();
        assert!(matches!(err, SyncError::Auth(_)));

        let err: SyncError = QueueError::<SyncError>::Cancelled.into();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
