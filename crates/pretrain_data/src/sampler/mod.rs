//! Index samplers.
//!
//! Every sampler implements [`Sampler`] and is a pure function of its
//! construction parameters and the `epoch` handed to [`Sampler::iter`]. No
//! sampler talks to other ranks: each data-parallel replica builds its own
//! instance with its own `data_parallel_rank` and derives the same ordering
//! from the shared seed.
//!
//! - Index samplers (`Item = usize`): [`SequentialSampler`], [`RandomSampler`],
//!   [`DistributedSampler`].
//! - Batch samplers (`Item = Vec<usize>`): [`BatchSampler`],
//!   [`PretrainingSampler`], [`PretrainingRandomSampler`],
//!   [`PropMixingRandomSampler`].

use anyhow::{bail, ensure, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod mixing;
mod pretraining;

pub use mixing::PropMixingRandomSampler;
pub use pretraining::{PretrainingRandomSampler, PretrainingSampler};

/// A `Sampler` decides which dataset indices are visited, and in which order,
/// during one epoch.
///
/// `iter(epoch)` must return the same sequence every time it is called with the
/// same `epoch`. Randomized samplers derive their RNG from `base_seed + epoch`
/// so a resumed run, or another rank, reproduces the ordering without any
/// shared state.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;

    /// Number of items a full call to `iter` yields, when known up front.
    fn expected_len(&self) -> Option<usize> {
        None
    }

    /// Number of items `iter(epoch)` yields. Differs from
    /// [`expected_len`](Self::expected_len) only for samplers resumed partway
    /// through one particular epoch.
    fn expected_len_at(&self, _epoch: usize) -> Option<usize> {
        self.expected_len()
    }
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    type Item = S::Item;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        (**self).iter(epoch)
    }

    fn expected_len(&self) -> Option<usize> {
        (**self).expected_len()
    }

    fn expected_len_at(&self, epoch: usize) -> Option<usize> {
        (**self).expected_len_at(epoch)
    }
}

/// Seeds the RNG used for `epoch`.
#[inline]
pub(crate) fn epoch_rng(base_seed: u64, epoch: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(epoch as u64))
}

/// ============================================================================
/// Yields `0..dataset_size` in order, ignoring the epoch.
#[derive(Debug, Clone)]
pub struct SequentialSampler {
    dataset_size: usize,
}

impl SequentialSampler {
    pub fn new(dataset_size: usize) -> Self {
        Self { dataset_size }
    }
}

impl Sampler for SequentialSampler {
    type Item = usize;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(0..self.dataset_size)
    }

    fn expected_len(&self) -> Option<usize> {
        Some(self.dataset_size)
    }
}

/// ============================================================================
/// Uniform random order over `0..dataset_size`.
///
/// Without replacement every index is visited once per epoch; with replacement
/// `num_samples` independent draws are made. The RNG for epoch `e` is seeded
/// with `base_seed + e`, so each epoch gets a fresh but reproducible order.
///
/// # Example
/// ```ignore
/// let sampler = RandomSampler::new(1000, false, None, 42)?;
/// let first_epoch: Vec<_> = sampler.iter(0).collect();
/// ```
#[derive(Debug, Clone)]
pub struct RandomSampler {
    dataset_size: usize,
    replacement: bool,
    num_samples: usize,
    base_seed: u64,
}

impl RandomSampler {
    pub fn new(
        dataset_size: usize,
        replacement: bool,
        num_samples: Option<usize>,
        base_seed: u64,
    ) -> Result<Self> {
        let num_samples = num_samples.unwrap_or(dataset_size);
        ensure!(
            num_samples > 0,
            "num_samples must be positive, got num_samples={}",
            num_samples
        );
        ensure!(
            replacement || num_samples <= dataset_size,
            "num_samples ({}) exceeds dataset size ({}) without replacement",
            num_samples,
            dataset_size
        );

        Ok(Self {
            dataset_size,
            replacement,
            num_samples,
            base_seed,
        })
    }
}

impl Sampler for RandomSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut rng = epoch_rng(self.base_seed, epoch);
        if self.replacement {
            let upper = self.dataset_size;
            Box::new((0..self.num_samples).map(move |_| rng.random_range(0..upper)))
        } else {
            let mut indices: Vec<usize> = (0..self.dataset_size).collect();
            indices.shuffle(&mut rng);
            indices.truncate(self.num_samples);
            Box::new(indices.into_iter())
        }
    }

    fn expected_len(&self) -> Option<usize> {
        Some(self.num_samples)
    }
}

/// ============================================================================
/// Groups the indices of an index sampler into batches of `batch_size`.
///
/// The final short batch is kept unless `drop_last` is set.
///
/// # Example
/// ```ignore
/// let batches = BatchSampler::new(SequentialSampler::new(10), 4, false)?;
/// // [0, 1, 2, 3], [4, 5, 6, 7], [8, 9]
/// ```
#[derive(Debug, Clone)]
pub struct BatchSampler<S> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Result<Self> {
        ensure!(
            batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            batch_size
        );
        Ok(Self {
            sampler,
            batch_size,
            drop_last,
        })
    }
}

impl<S: Sampler> BatchSampler<S> {
    fn batches_for(&self, items: usize) -> Option<usize> {
        Some(if self.drop_last {
            items / self.batch_size
        } else {
            items.div_ceil(self.batch_size)
        })
    }
}

impl<S: Sampler> Sampler for BatchSampler<S> {
    type Item = Vec<S::Item>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_> {
        let mut inner = self.sampler.iter(epoch);
        let batch_size = self.batch_size;
        let drop_last = self.drop_last;

        Box::new(std::iter::from_fn(move || {
            let batch: Vec<_> = inner.by_ref().take(batch_size).collect();
            let keep = batch.len() == batch_size || (!drop_last && !batch.is_empty());
            keep.then_some(batch)
        }))
    }

    fn expected_len(&self) -> Option<usize> {
        self.batches_for(self.sampler.expected_len()?)
    }

    fn expected_len_at(&self, epoch: usize) -> Option<usize> {
        self.batches_for(self.sampler.expected_len_at(epoch)?)
    }
}

/// ============================================================================
/// Splits `0..dataset_size` across `num_replicas` ranks with a stride.
///
/// Rank `r` takes positions `r, r + num_replicas, r + 2 * num_replicas, ...` of
/// the (optionally shuffled) index list. The list is first made divisible by
/// `num_replicas`: truncated when `drop_last`, otherwise padded by cycling
/// from its front, so every rank sees the same number of samples.
///
/// ```text
/// dataset_size = 10, num_replicas = 3
///   drop_last = true   rank 0: [0, 3, 6]   rank 1: [1, 4, 7]   rank 2: [2, 5, 8]
///   drop_last = false  rank 0: [0, 3, 6, 9] rank 1: [1, 4, 7, 0] rank 2: [2, 5, 8, 1]
/// ```
///
/// Evaluation loaders use this with `shuffle = false`.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_size: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    drop_last: bool,
    base_seed: u64,
}

impl DistributedSampler {
    pub fn new(
        dataset_size: usize,
        num_replicas: usize,
        rank: usize,
        shuffle: bool,
        drop_last: bool,
        base_seed: u64,
    ) -> Result<Self> {
        ensure!(dataset_size > 0, "Cannot distribute an empty dataset");
        ensure!(num_replicas > 0, "num_replicas must be > 0");
        ensure!(
            rank < num_replicas,
            "Invalid rank {rank}, expected a value in [0, {}]",
            num_replicas - 1
        );
        Ok(Self {
            dataset_size,
            num_replicas,
            rank,
            shuffle,
            drop_last,
            base_seed,
        })
    }

    /// Length of the index list after truncation or padding.
    fn total_size(&self) -> usize {
        if self.drop_last {
            self.dataset_size - self.dataset_size % self.num_replicas
        } else {
            self.dataset_size.div_ceil(self.num_replicas) * self.num_replicas
        }
    }
}

impl Sampler for DistributedSampler {
    type Item = usize;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        let mut indices: Vec<usize> = (0..self.dataset_size).collect();
        if self.shuffle {
            indices.shuffle(&mut epoch_rng(self.base_seed, epoch));
        }

        let total_size = self.total_size();
        if total_size <= indices.len() {
            indices.truncate(total_size);
        } else {
            let missing = total_size - indices.len();
            let padding: Vec<usize> = indices.iter().cycle().take(missing).copied().collect();
            indices.extend(padding);
        }

        Box::new(
            indices
                .into_iter()
                .skip(self.rank)
                .step_by(self.num_replicas),
        )
    }

    fn expected_len(&self) -> Option<usize> {
        Some(self.total_size() / self.num_replicas)
    }
}

/// ============================================================================
/// Selects the training batch sampler.
///
/// - `single`: [`PretrainingSampler`], identity order.
/// - `random`, `mixing`: [`PretrainingRandomSampler`], per-epoch shuffle.
/// - `mixing_balance`: [`PropMixingRandomSampler`], batches drawn from
///   sub-datasets in proportion to their size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SamplerType {
    Single,
    #[default]
    Random,
    Mixing,
    MixingBalance,
}

impl SamplerType {
    pub const ALL: [SamplerType; 4] = [
        SamplerType::Single,
        SamplerType::Random,
        SamplerType::Mixing,
        SamplerType::MixingBalance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SamplerType::Single => "single",
            SamplerType::Random => "random",
            SamplerType::Mixing => "mixing",
            SamplerType::MixingBalance => "mixing_balance",
        }
    }
}

impl FromStr for SamplerType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match SamplerType::ALL.iter().find(|kind| kind.as_str() == value) {
            Some(kind) => Ok(*kind),
            None => bail!(
                "Unknown sampler type: {} (expected one of: single, random, mixing, mixing_balance)",
                value
            ),
        }
    }
}

impl TryFrom<String> for SamplerType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SamplerType> for String {
    fn from(kind: SamplerType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SamplerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
