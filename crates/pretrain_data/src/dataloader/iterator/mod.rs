//! src/dataloader/iterator/mod.rs
//!
//! Iterator implementation for DataLoader.
//!
//! - `Single`: the calling thread fetches and collates each batch.
//! - `Multi`: batches are handed round-robin to a fresh worker pool and
//!   put back in sampler order before they are yielded.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::collator::Collator;
use crate::dataset::Dataset;

use super::workers::pool::WorkerPool;
use super::workers::{fetch_and_collate, BatchOutput, BatchTask};

type BatchIndices<'a> = Box<dyn Iterator<Item = Vec<usize>> + Send + 'a>;

/// Iterator over the batches of one epoch.
///
/// Created by calling `dataloader.iter()` or `dataloader.iter_epoch(epoch)`.
/// Yields batches in the order the sampler produced their indices. The
/// worker threads, if any, are joined when the iterator is dropped.
pub struct DataLoaderIter<'a, D: Dataset, C: Collator<D::Item>> {
    epoch: usize,
    inner: IteratorImpl<'a, D, C>,
}

enum IteratorImpl<'a, D: Dataset, C: Collator<D::Item>> {
    Single {
        dataset: &'a D,
        collator: &'a C,
        batch_indices: BatchIndices<'a>,
    },

    /// - `next_to_send`: position of the next batch handed to a worker
    /// - `next_to_yield`: position of the next batch returned to the caller
    /// - `reorder`: finished batches that arrived ahead of `next_to_yield`
    Multi {
        pool: WorkerPool<BatchTask, BatchOutput<C::Batch>>,
        batch_indices: BatchIndices<'a>,
        max_in_flight: usize,
        next_to_send: usize,
        next_to_yield: usize,
        reorder: BTreeMap<usize, Result<C::Batch>>,
        exhausted: bool,
        failed: bool,
        timeout: Duration,
    },
}

impl<'a, D: Dataset, C: Collator<D::Item>> DataLoaderIter<'a, D, C> {
    pub(crate) fn single(epoch: usize, dataset: &'a D, collator: &'a C, batch_indices: BatchIndices<'a>) -> Self {
        Self {
            epoch,
            inner: IteratorImpl::Single {
                dataset,
                collator,
                batch_indices,
            },
        }
    }

    pub(crate) fn multi(
        epoch: usize,
        pool: WorkerPool<BatchTask, BatchOutput<C::Batch>>,
        batch_indices: BatchIndices<'a>,
        prefetch_factor: usize,
        timeout: Duration,
    ) -> Self {
        let max_in_flight = pool.num_workers() * prefetch_factor;
        Self {
            epoch,
            inner: IteratorImpl::Multi {
                pool,
                batch_indices,
                max_in_flight,
                next_to_send: 0,
                next_to_yield: 0,
                reorder: BTreeMap::new(),
                exhausted: false,
                failed: false,
                timeout,
            },
        }
    }

    /// Epoch whose batches this iterator yields.
    pub fn epoch(&self) -> usize {
        self.epoch
    }
}

impl<'a, D: Dataset, C: Collator<D::Item>> Iterator for DataLoaderIter<'a, D, C> {
    type Item = Result<C::Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IteratorImpl::Single {
                dataset,
                collator,
                batch_indices,
            } => {
                let indices = batch_indices.next()?;
                Some(
                    fetch_and_collate(*dataset, *collator, &indices)
                        .context("Failed to load batch in single-threaded mode"),
                )
            }

            IteratorImpl::Multi {
                pool,
                batch_indices,
                max_in_flight,
                next_to_send,
                next_to_yield,
                reorder,
                exhausted,
                failed,
                timeout,
            } => {
                if *failed {
                    return None;
                }

                // Keep the pipeline full; batch i always goes to worker i % num_workers
                while !*exhausted && *next_to_send - *next_to_yield < *max_in_flight {
                    match batch_indices.next() {
                        Some(indices) => {
                            let worker = *next_to_send % pool.num_workers();
                            let task = BatchTask {
                                batch_index: *next_to_send,
                                indices,
                            };
                            if let Err(e) = pool.send_to(worker, task) {
                                *failed = true;
                                return Some(Err(e.context(format!(
                                    "Failed to send batch {} to worker {}",
                                    *next_to_send, worker
                                ))));
                            }
                            *next_to_send += 1;
                        }
                        None => *exhausted = true,
                    }
                }

                if *next_to_yield == *next_to_send {
                    return None;
                }

                loop {
                    if let Some(result) = reorder.remove(&*next_to_yield) {
                        *next_to_yield += 1;
                        return Some(result);
                    }
                    match pool.recv_timeout(*timeout) {
                        Ok((batch_index, result)) => {
                            reorder.insert(batch_index, result);
                        }
                        Err(e) => {
                            *failed = true;
                            return Some(Err(e.context(format!(
                                "Waiting for batch {}",
                                *next_to_yield
                            ))));
                        }
                    }
                }
            }
        }
    }
}
