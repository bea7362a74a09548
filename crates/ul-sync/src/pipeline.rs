//! Batch pipeline
//!
//! Splits a task list into consecutive batches of `batch_size` and runs them
//! one after another. Every task in a batch starts together and the batch is
//! joined before the next one starts, so all results of batch K precede all
//! results of batch K+1, and within a batch results keep submission order.
//!
//! The concurrency bound is the batch width rather than a rolling window:
//! one slow task holds up the whole batch. Use [`crate::queue::TaskQueue`]
//! when throughput matters more than ordering.

use crate::queue::QueueError;
use futures::future::try_join_all;
use std::future::Future;
use tracing::debug;

/// Run `tasks` in ordered batches of at most `batch_size`
///
/// The first failure settles the pipeline; batches after the failing one are
/// never started.
pub async fn run_pipeline<I, F, Fut, T, E>(
    tasks: I,
    batch_size: usize,
) -> std::result::Result<Vec<T>, QueueError<E>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    if batch_size == 0 {
        return Err(QueueError::Contract(
            "pipeline batch size must be at least 1".to_string(),
        ));
    }

    let mut tasks = tasks.into_iter().peekable();
    let mut results = Vec::new();
    let mut batch_index = 0usize;

    while tasks.peek().is_some() {
        // Futures are only created here, when their batch starts.
        let batch: Vec<Fut> = tasks.by_ref().take(batch_size).map(|task| task()).collect();
        debug!(batch = batch_index, width = batch.len(), "Starting pipeline batch");

        let batch_results = try_join_all(batch).await.map_err(QueueError::Task)?;
        results.extend(batch_results);
        batch_index += 1;
    }

    debug!(batches = batch_index, total = results.len(), "Pipeline complete");
    Ok(results)
}
