//! Resumable batch samplers for data-parallel pretraining.
//!
//! Both samplers cut the logical sample stream into *global batches* of
//! `micro_batch_size * data_parallel_size` samples. Every rank builds its own
//! sampler from the same arguments (except `data_parallel_rank`) and yields
//! only its own micro-batch of each global batch, so the ranks never overlap
//! and never need to talk to each other.
//!
//! Resuming is done by passing the number of samples consumed so far
//! (see [`crate::consumed::resolve_consumed_samples`]) together with the epoch
//! it was counted in. The samplers skip that prefix of the stream in that epoch
//! only; every other epoch is served in full.

use anyhow::{ensure, Context, Result};
use rand::seq::SliceRandom;

use super::{epoch_rng, Sampler};

fn validate_partition(
    total_samples: usize,
    micro_batch_size: usize,
    data_parallel_rank: usize,
    data_parallel_size: usize,
) -> Result<usize> {
    ensure!(
        total_samples > 0,
        "no sample to consume: total_samples={}",
        total_samples
    );
    ensure!(
        micro_batch_size > 0,
        "micro_batch_size must be > 0, but got micro_batch_size={}",
        micro_batch_size
    );
    ensure!(
        data_parallel_size > 0,
        "data_parallel_size must be > 0, but got data_parallel_size={}",
        data_parallel_size
    );
    ensure!(
        data_parallel_rank < data_parallel_size,
        "data_parallel_rank should be smaller than data size: {}, {}",
        data_parallel_rank,
        data_parallel_size
    );
    micro_batch_size
        .checked_mul(data_parallel_size)
        .with_context(|| {
            format!(
                "global batch size overflows: {} x {}",
                micro_batch_size, data_parallel_size
            )
        })
}

/// ============================================================================
/// Identity-order sampler ("single" mode).
///
/// Walks `consumed_samples..total_samples` in order. From each global batch
/// rank `r` receives positions `[r * micro_batch_size, (r + 1) * micro_batch_size)`.
///
/// ```text
/// total_samples = 10, consumed_samples = 2, micro_batch_size = 2, data_parallel_size = 2
///   global batches: [2, 3, 4, 5] [6, 7, 8, 9]
///   rank 0: [2, 3] [6, 7]
///   rank 1: [4, 5] [8, 9]
/// ```
///
/// The last, incomplete global batch is dropped unless `drop_last` is turned
/// off with [`with_drop_last`](Self::with_drop_last), in which case each rank
/// gets whatever part of its slice exists.
///
/// `consumed_samples` only shortens the epoch set with
/// [`with_epoch`](Self::with_epoch) (epoch 0 by default). Iterating any other
/// epoch starts again from sample 0.
#[derive(Debug, Clone)]
pub struct PretrainingSampler {
    total_samples: usize,
    consumed_samples: usize,
    micro_batch_size: usize,
    data_parallel_rank: usize,
    data_parallel_size: usize,
    global_batch_size: usize,
    resume_epoch: usize,
    drop_last: bool,
}

impl PretrainingSampler {
    pub fn new(
        total_samples: usize,
        consumed_samples: usize,
        micro_batch_size: usize,
        data_parallel_rank: usize,
        data_parallel_size: usize,
    ) -> Result<Self> {
        let global_batch_size = validate_partition(
            total_samples,
            micro_batch_size,
            data_parallel_rank,
            data_parallel_size,
        )?;
        ensure!(
            consumed_samples < total_samples,
            "no samples left to consume: {}, {}",
            consumed_samples,
            total_samples
        );

        Ok(Self {
            total_samples,
            consumed_samples,
            micro_batch_size,
            data_parallel_rank,
            data_parallel_size,
            global_batch_size,
            resume_epoch: 0,
            drop_last: true,
        })
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Epoch in which `consumed_samples` were counted.
    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.resume_epoch = epoch;
        self
    }

    pub fn consumed_samples(&self) -> usize {
        self.consumed_samples
    }

    /// `micro_batch_size * data_parallel_size`.
    pub fn global_batch_size(&self) -> usize {
        self.global_batch_size
    }

    /// Full global batches in one pass over the whole dataset.
    pub fn batches_per_epoch(&self) -> usize {
        self.total_samples / self.global_batch_size()
    }

    fn first_sample(&self, epoch: usize) -> usize {
        if epoch == self.resume_epoch {
            self.consumed_samples
        } else {
            0
        }
    }

    /// Bounds of this rank's slice of the global batch starting at `batch_start`.
    fn rank_slice(&self, batch_start: usize, batch_end: usize) -> (usize, usize) {
        let lo = batch_start
            .saturating_add(self.data_parallel_rank * self.micro_batch_size)
            .min(batch_end);
        let hi = lo.saturating_add(self.micro_batch_size).min(batch_end);
        (lo, hi)
    }
}

impl Sampler for PretrainingSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let global = self.global_batch_size;
        let total = self.total_samples;

        Box::new(
            (self.first_sample(epoch)..total)
                .step_by(global)
                .filter_map(move |batch_start| {
                    let batch_end = batch_start.saturating_add(global).min(total);
                    if batch_end - batch_start < global && self.drop_last {
                        return None;
                    }
                    let (lo, hi) = self.rank_slice(batch_start, batch_end);
                    (lo < hi).then(|| (lo..hi).collect::<Vec<usize>>())
                }),
        )
    }

    fn expected_len(&self) -> Option<usize> {
        self.expected_len_at(self.resume_epoch)
    }

    fn expected_len_at(&self, epoch: usize) -> Option<usize> {
        let first = self.first_sample(epoch);
        let remaining = self.total_samples - first;
        let global = self.global_batch_size;
        let full = remaining / global;
        if self.drop_last || remaining % global == 0 {
            return Some(full);
        }
        let tail_start = first + full * global;
        let (lo, hi) = self.rank_slice(tail_start, self.total_samples);
        Some(full + usize::from(lo < hi))
    }
}

/// ============================================================================
/// Shuffling sampler ("random" mode).
///
/// The dataset is sharded into one contiguous bucket per rank, each holding
/// `batches_per_epoch * micro_batch_size` indices; the trailing
/// `total_samples % global_batch_size` samples are left out of the epoch.
/// Every rank draws the same permutation of `0..bucket_size` from an RNG seeded
/// with `base_seed + epoch`, applies it to its own bucket, and cuts the result
/// into micro-batches.
///
/// ```text
/// total_samples = 8, micro_batch_size = 2, data_parallel_size = 2
///   rank 0 bucket: [0, 1, 2, 3]   rank 1 bucket: [4, 5, 6, 7]
///   permutation for the epoch: [2, 0, 3, 1]
///   rank 0: [2, 0] [3, 1]         rank 1: [6, 4] [7, 5]
/// ```
///
/// `consumed_samples` counts across epochs. Only its position inside the
/// current epoch matters, and that position has to fall on a global batch
/// boundary. Resuming skips the same number of micro-batches on every rank,
/// and only in the epoch passed to [`new`](Self::new).
///
/// This sampler yields a single epoch. The caller moves to the next one by
/// passing a larger `epoch` to [`Sampler::iter`] or calling
/// [`set_epoch`](Self::set_epoch); that epoch is served in full.
#[derive(Debug, Clone)]
pub struct PretrainingRandomSampler {
    total_samples: usize,
    consumed_samples: usize,
    micro_batch_size: usize,
    data_parallel_rank: usize,
    data_parallel_size: usize,
    global_batch_size: usize,
    resume_epoch: usize,
    epoch: usize,
    base_seed: u64,
}

impl PretrainingRandomSampler {
    pub fn new(
        total_samples: usize,
        consumed_samples: usize,
        micro_batch_size: usize,
        data_parallel_rank: usize,
        data_parallel_size: usize,
        epoch: usize,
    ) -> Result<Self> {
        let global = validate_partition(
            total_samples,
            micro_batch_size,
            data_parallel_rank,
            data_parallel_size,
        )?;
        ensure!(
            total_samples >= global,
            "total_samples ({}) is smaller than one global batch ({} = {} x {})",
            total_samples,
            global,
            micro_batch_size,
            data_parallel_size
        );

        let sampler = Self {
            total_samples,
            consumed_samples,
            micro_batch_size,
            data_parallel_rank,
            data_parallel_size,
            global_batch_size: global,
            resume_epoch: epoch,
            epoch,
            base_seed: 0,
        };
        let in_epoch = sampler.current_epoch_samples();
        ensure!(
            in_epoch % global == 0,
            "consumed samples within the epoch ({}) must be a multiple of the global batch size ({})",
            in_epoch,
            global
        );
        Ok(sampler)
    }

    /// Offsets the epoch seed. Every rank must use the same value.
    pub fn with_base_seed(mut self, base_seed: u64) -> Self {
        self.base_seed = base_seed;
        self
    }

    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn consumed_samples(&self) -> usize {
        self.consumed_samples
    }

    pub fn global_batch_size(&self) -> usize {
        self.global_batch_size
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.total_samples / self.global_batch_size
    }

    /// Samples of the resumed epoch already consumed.
    fn current_epoch_samples(&self) -> usize {
        let active_total = self.batches_per_epoch() * self.global_batch_size;
        self.consumed_samples % active_total
    }

    fn bucket_size(&self) -> usize {
        self.batches_per_epoch() * self.micro_batch_size
    }

    fn bucket_offset(&self, epoch: usize) -> usize {
        if epoch == self.resume_epoch {
            self.current_epoch_samples() / self.data_parallel_size
        } else {
            0
        }
    }

    /// Iterates the epoch stored in the sampler.
    pub fn iter_current(&self) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        self.iter(self.epoch)
    }
}

impl Sampler for PretrainingRandomSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let bucket_size = self.bucket_size();
        let bucket_start = self.data_parallel_rank * bucket_size;

        let mut permutation: Vec<usize> = (0..bucket_size).collect();
        permutation.shuffle(&mut epoch_rng(self.base_seed, epoch));

        let batches: Vec<Vec<usize>> = permutation[self.bucket_offset(epoch)..]
            .chunks_exact(self.micro_batch_size)
            .map(|chunk| chunk.iter().map(|&i| bucket_start + i).collect())
            .collect();
        Box::new(batches.into_iter())
    }

    fn expected_len(&self) -> Option<usize> {
        self.expected_len_at(self.epoch)
    }

    fn expected_len_at(&self, epoch: usize) -> Option<usize> {
        Some((self.bucket_size() - self.bucket_offset(epoch)) / self.micro_batch_size)
    }
}
