//! src/dataloader/loader.rs
//!
//! DataLoader constructors for different batching needs.
//!
//! # Constructor Overview
//!
//! ### Automatic Sampling
//! `new()` creates the sampler from `config.shuffle`:
//! - If `config.shuffle = false`, DataLoader creates a SequentialSampler.
//! - If `config.shuffle = true`, DataLoader creates a RandomSampler with `config.seed`.
//!
//! ### Custom sampling
//! - `with_sampler()` - User provided index sampler, wrapped in a `BatchSampler`
//!   using the configured batch_size and drop_last.
//! - `with_batch_sampler()` - User provided batch sampler, used as is. This is
//!   how the pretraining samplers plug in: they already decide which indices
//!   form each rank's micro-batch.
//!
//! # Epochs
//!
//! The loader keeps an epoch counter starting at `config.start_epoch`. Every
//! `iter()` hands the counter to the sampler and then advances it, so a
//! shuffling sampler reshuffles each epoch and a resumed run continues with
//! the ordering of the epoch it stopped in.

use crate::collator::Collator;
use crate::dataset::Dataset;
use crate::sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::config::DataLoaderConfig;
use super::iterator::DataLoaderIter;
use super::workers::spawn_batch_workers;

/// A boxed sampler producing batches of indices.
pub type BoxedBatchSampler = Box<dyn Sampler<Item = Vec<usize>>>;

/// The DataLoader coordinates a dataset, a batch sampler and a collator.
///
/// # Thread safety:
/// - `DataLoader` itself is Send + Sync and can be shared across threads.
/// - Multiple iterators can be created from the same DataLoader safely.
///
/// # Type parameters:
/// - `D`: Dataset type
/// - `C`: Collator type
pub struct DataLoader<D, C> {
    pub(crate) dataset: Arc<D>,
    pub(crate) collator: Arc<C>,
    pub(crate) config: DataLoaderConfig,
    pub(crate) batch_sampler: BoxedBatchSampler,
    pub(crate) current_epoch: AtomicUsize,
}

fn check_prefetch(config: &DataLoaderConfig) -> Result<()> {
    if config.prefetch_factor == 0 && config.num_workers > 0 {
        return Err(anyhow!(
            "Prefetch factor must be > 0 when using {} workers",
            config.num_workers
        ));
    }
    Ok(())
}

/// Fills in `batch_size`/`drop_last` defaults and validates them.
fn resolve_batching(config: &mut DataLoaderConfig) -> Result<(usize, bool)> {
    let batch_size = config.batch_size.unwrap_or(1);
    let drop_last = config.drop_last.unwrap_or(false);
    if batch_size == 0 {
        return Err(anyhow!("Batch size must be greater than 0"));
    }
    config.batch_size = Some(batch_size);
    config.drop_last = Some(drop_last);
    Ok((batch_size, drop_last))
}

impl<D, C> DataLoader<D, C>
where
    D: Dataset + 'static,
    C: Collator<D::Item> + 'static,
{
    /// Creates a DataLoader that manages sampling itself.
    ///
    /// - If `shuffle = true`: RandomSampler seeded with `config.seed` (or a
    ///   random seed when unset)
    /// - If `shuffle = false`: SequentialSampler
    ///
    /// # Example
    /// ```ignore
    /// let config = DataLoaderConfig::builder()
    ///     .batch_size(32)
    ///     .shuffle(true)
    ///     .seed(42)
    ///     .build();
    /// let dataloader = DataLoader::new(dataset, config, PaddingCollator::new())?;
    /// ```
    pub fn new(dataset: D, mut config: DataLoaderConfig, collator: C) -> Result<Self> {
        let (batch_size, drop_last) = resolve_batching(&mut config)?;
        let shuffle = config.shuffle.unwrap_or(false);
        config.shuffle = Some(shuffle);
        check_prefetch(&config)?;

        let sampler: Box<dyn Sampler<Item = usize>> = if shuffle {
            let seed = config.seed.unwrap_or_else(|| rand::rng().random());
            Box::new(RandomSampler::new(dataset.len(), false, None, seed)?)
        } else {
            Box::new(SequentialSampler::new(dataset.len()))
        };

        let batch_sampler = BatchSampler::new(sampler, batch_size, drop_last)
            .context("Failed to wrap sampler with BatchSampler")?;

        Ok(Self::assemble(dataset, collator, config, Box::new(batch_sampler)))
    }

    /// Creates a DataLoader with a user-provided index sampler.
    ///
    /// # Errors
    /// - Returns error if `config.shuffle = true`
    pub fn with_sampler<S>(dataset: D, sampler: S, mut config: DataLoaderConfig, collator: C) -> Result<Self>
    where
        S: Sampler<Item = usize> + 'static,
    {
        if let Some(true) = config.shuffle {
            return Err(anyhow!(
                "Cannot specify shuffle = true when providing a custom sampler.\n\
                Either:\n\
                1. Use DataLoader::new() with shuffle=true to let DataLoader manage sampling\n\
                2. Use DataLoader::with_sampler() with shuffle=false and your own sampler"
            ));
        }
        config.shuffle = Some(false);

        let (batch_size, drop_last) = resolve_batching(&mut config)?;
        check_prefetch(&config)?;

        let batch_sampler = BatchSampler::new(sampler, batch_size, drop_last)
            .context("Failed to wrap sampler with BatchSampler")?;

        Ok(Self::assemble(dataset, collator, config, Box::new(batch_sampler)))
    }

    /// Creates a DataLoader with a user-provided batch sampler.
    ///
    /// Note:
    /// - `config.batch_size` and `config.drop_last` must be unset since the
    ///   batch sampler controls batching.
    /// - `config.shuffle` must not be true.
    ///
    /// # Example
    /// ```ignore
    /// let sampler = PretrainingRandomSampler::new(len, consumed, 8, rank, world, epoch)?;
    /// let loader = DataLoader::with_batch_sampler(dataset, sampler, config, collator)?;
    /// ```
    pub fn with_batch_sampler<S>(dataset: D, batch_sampler: S, mut config: DataLoaderConfig, collator: C) -> Result<Self>
    where
        S: Sampler<Item = Vec<usize>> + 'static,
    {
        if config.batch_size.is_some() {
            return Err(anyhow!(
                "batch_size must not be specified when using batch_sampler.\n\
                The batch_sampler controls batch size."
            ));
        }

        if config.drop_last.is_some() {
            return Err(anyhow!(
                "drop_last must not be specified when using batch_sampler.\n\
                The batch_sampler controls whether to drop the last batch."
            ));
        }

        if let Some(true) = config.shuffle {
            return Err(anyhow!(
                "Cannot specify shuffle=true when providing a batch sampler.\n\
                The batch sampler should handle its own shuffling logic."
            ));
        }
        config.shuffle = Some(false);
        check_prefetch(&config)?;

        Ok(Self::assemble(dataset, collator, config, Box::new(batch_sampler)))
    }

    fn assemble(dataset: D, collator: C, config: DataLoaderConfig, batch_sampler: BoxedBatchSampler) -> Self {
        let current_epoch = AtomicUsize::new(config.start_epoch);
        Self {
            dataset: Arc::new(dataset),
            collator: Arc::new(collator),
            config,
            batch_sampler,
            current_epoch,
        }
    }

    /// Creates an iterator over the batches of the current epoch, then
    /// advances the epoch counter.
    pub fn iter(&self) -> Result<DataLoaderIter<'_, D, C>> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst);
        self.iter_epoch(epoch)
    }

    /// Creates an iterator over the batches of `epoch` without touching the
    /// epoch counter.
    pub fn iter_epoch(&self, epoch: usize) -> Result<DataLoaderIter<'_, D, C>> {
        let batch_indices = self.batch_sampler.iter(epoch);

        if self.config.num_workers == 0 {
            return Ok(DataLoaderIter::single(
                epoch,
                self.dataset.as_ref(),
                self.collator.as_ref(),
                batch_indices,
            ));
        }

        let pool = spawn_batch_workers(
            self.dataset.clone(),
            self.collator.clone(),
            self.config.num_workers,
            self.config.prefetch_factor,
            self.config.worker_timeout,
        )?;
        Ok(DataLoaderIter::multi(
            epoch,
            pool,
            batch_indices,
            self.config.prefetch_factor,
            self.config.timeout,
        ))
    }

    /// Epoch the next call to `iter()` will use.
    pub fn epoch(&self) -> usize {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Moves the epoch counter.
    pub fn set_epoch(&self, epoch: usize) {
        self.current_epoch.store(epoch, Ordering::SeqCst);
    }

    /// Number of batches the next call to `iter()` yields, when the sampler
    /// knows it.
    pub fn len(&self) -> Option<usize> {
        self.batch_sampler.expected_len_at(self.epoch())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    pub fn batch_sampler(&self) -> &dyn Sampler<Item = Vec<usize>> {
        self.batch_sampler.as_ref()
    }
}
