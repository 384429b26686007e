//! Worker management for parallel data loading.
//!
//! - `pool`: Worker pool implementation
//! - this module: the batch task, and the fetch + collate step shared by the
//!   single-threaded iterator and the workers

pub(crate) mod pool;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use log::debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::collator::Collator;
use crate::dataset::Dataset;
use pool::WorkerPool;

/// One batch of indices, tagged with its position in the epoch.
#[derive(Debug)]
pub(crate) struct BatchTask {
    pub(crate) batch_index: usize,
    pub(crate) indices: Vec<usize>,
}

/// Result of a [`BatchTask`], tagged with the same position.
pub(crate) type BatchOutput<B> = (usize, Result<B>);

/// Fetches every index of a batch and collates the items.
pub(crate) fn fetch_and_collate<D, C>(dataset: &D, collator: &C, indices: &[usize]) -> Result<C::Batch>
where
    D: Dataset + ?Sized,
    C: Collator<D::Item> + ?Sized,
{
    let items = indices
        .iter()
        .map(|&index| {
            dataset.get(index).ok_or_else(|| {
                anyhow!(
                    "Failed to load sample at index {} (dataset size: {})",
                    index,
                    dataset.len()
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let count = items.len();
    collator
        .collate(items)
        .with_context(|| format!("Failed to collate batch of {} samples", count))
}

/// Spawns a fresh pool of workers for one epoch.
///
/// Workers share the dataset and collator through `Arc`s and exit when the
/// pool is dropped.
pub(crate) fn spawn_batch_workers<D, C>(
    dataset: Arc<D>,
    collator: Arc<C>,
    num_workers: usize,
    prefetch_factor: usize,
    worker_timeout: Duration,
) -> Result<WorkerPool<BatchTask, BatchOutput<C::Batch>>>
where
    D: Dataset + 'static,
    C: Collator<D::Item> + 'static,
{
    debug!(
        "spawning {} dataloader workers (prefetch_factor={})",
        num_workers, prefetch_factor
    );

    WorkerPool::<BatchTask, BatchOutput<C::Batch>>::new(
        num_workers,
        prefetch_factor,
        move |worker_id, task_rx, output_tx, shutdown| {
            while !shutdown.load(Ordering::Relaxed) {
                match task_rx.recv_timeout(worker_timeout) {
                    Ok(BatchTask {
                        batch_index,
                        indices,
                    }) => {
                        let result = fetch_and_collate(dataset.as_ref(), collator.as_ref(), &indices)
                            .with_context(|| {
                                format!("Worker {} failed to process batch {}", worker_id, batch_index)
                            });
                        if output_tx.send((batch_index, result)).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        },
    )
    .context("Failed to create worker pool")
}
