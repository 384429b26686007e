//! Loader options for pretraining runs.
//!
//! Training loaders built by the datamodule only set `num_workers` and
//! `start_epoch`: batching, sharding and resume offsets belong to the
//! pretraining batch sampler. The batching options here serve evaluation
//! loaders and the plain shuffled loader used when the trainer injects its
//! own distributed sampler.
//!
//! ```ignore
//! // resumed training on rank 1 of 4, in epoch 3
//! let config = DataLoaderConfig::builder()
//!     .num_workers(8)
//!     .start_epoch(3)
//!     .build();
//! let loader = DataLoader::with_batch_sampler(train, sampler, config, collator)?;
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Samples per micro-batch, 1 when unset. Left unset under a batch
    /// sampler, which fixes the micro-batch itself.
    pub batch_size: Option<usize>,
    /// Collate threads. 0 collates on the caller's thread.
    pub num_workers: usize,
    /// Drop a trailing short micro-batch. False when unset.
    pub drop_last: Option<bool>,
    /// Reshuffle the whole split every epoch. Only for loaders that build
    /// their own sampler.
    pub shuffle: Option<bool>,
    /// Seed of that shuffle; the epoch number is added to it.
    pub seed: Option<u64>,
    /// Collated batches queued per worker ahead of the trainer.
    pub prefetch_factor: usize,
    /// Longest wait for the next collated batch before the epoch fails.
    pub timeout: Duration,
    /// Poll interval of idle workers watching for shutdown.
    pub worker_timeout: Duration,
    /// Epoch the first `iter()` hands to the sampler. Resumed runs pass the
    /// trainer's current epoch so the sampler skips consumed samples there
    /// and nowhere else.
    pub start_epoch: usize,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            num_workers: 0,
            drop_last: None,
            shuffle: None,
            seed: None,
            prefetch_factor: 2,
            timeout: Duration::from_secs(30),
            worker_timeout: Duration::from_millis(100),
            start_epoch: 0,
        }
    }
}

impl DataLoaderConfig {
    pub fn builder() -> DataLoaderConfigBuilder {
        DataLoaderConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct DataLoaderConfigBuilder {
    config: DataLoaderConfig,
}

impl DataLoaderConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = Some(size);
        self
    }

    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    pub fn drop_last(mut self, drop: bool) -> Self {
        self.config.drop_last = Some(drop);
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = Some(shuffle);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// A heavy tokenizer in the collator needs a longer timeout; a short one
    /// surfaces a hung worker sooner.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.config.worker_timeout = worker_timeout;
        self
    }

    /// Usually `TrainerState::current_epoch`.
    pub fn start_epoch(mut self, epoch: usize) -> Self {
        self.config.start_epoch = epoch;
        self
    }

    pub fn build(self) -> DataLoaderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_loader_leaves_batching_to_the_sampler() {
        let config = DataLoaderConfig::builder().num_workers(8).start_epoch(3).build();
        assert_eq!(config.batch_size, None);
        assert_eq!(config.drop_last, None);
        assert_eq!(config.shuffle, None);
        assert_eq!(config.start_epoch, 3);
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.prefetch_factor, 2);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
