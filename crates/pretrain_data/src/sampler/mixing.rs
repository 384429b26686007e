//! Proportional mixing over concatenated sub-datasets ("mixing_balance" mode).

use anyhow::{ensure, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;

use super::{epoch_rng, Sampler};

/// ============================================================================
/// Draws every global batch from a single sub-dataset, choosing the
/// sub-dataset with probability proportional to the global batches it still
/// has left in the epoch.
///
/// The sampler sees the concatenation of the sources described by
/// `source_sizes`: source `s` owns the global index range starting at the sum
/// of the sizes before it. Within a source the order is a per-epoch
/// permutation; the trailing `size % global_batch_size` samples of each
/// source sit out the epoch. Large and small sources therefore run out at the
/// same pace instead of the small one being exhausted first.
///
/// As with [`PretrainingSampler`](super::PretrainingSampler), rank `r` gets
/// positions `[r * micro_batch_size, (r + 1) * micro_batch_size)` of every
/// global batch, and all ranks derive the same plan from `base_seed + epoch`.
/// Consumed batches are skipped only in the epoch passed to [`new`](Self::new).
///
/// # Example
/// ```ignore
/// // two dialogue corpora of 1_000 and 250 samples concatenated together
/// let sampler = PropMixingRandomSampler::new(vec![1_000, 250], consumed, 8, rank, 4, epoch)?;
/// for micro_batch in sampler.iter(epoch) {
///     // all 8 indices come from the same corpus
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PropMixingRandomSampler {
    source_sizes: Vec<usize>,
    consumed_samples: usize,
    micro_batch_size: usize,
    data_parallel_rank: usize,
    data_parallel_size: usize,
    global_batch_size: usize,
    resume_epoch: usize,
    epoch: usize,
    base_seed: u64,
}

impl PropMixingRandomSampler {
    pub fn new(
        source_sizes: Vec<usize>,
        consumed_samples: usize,
        micro_batch_size: usize,
        data_parallel_rank: usize,
        data_parallel_size: usize,
        epoch: usize,
    ) -> Result<Self> {
        ensure!(!source_sizes.is_empty(), "Source list must not be empty");
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
        let global_batch_size = micro_batch_size
            .checked_mul(data_parallel_size)
            .with_context(|| {
                format!(
                    "global batch size overflows: {} x {}",
                    micro_batch_size, data_parallel_size
                )
            })?;

        let sampler = Self {
            source_sizes,
            consumed_samples,
            micro_batch_size,
            data_parallel_rank,
            data_parallel_size,
            global_batch_size,
            resume_epoch: epoch,
            epoch,
            base_seed: 0,
        };
        ensure!(
            sampler.batches_per_epoch() > 0,
            "No source holds a full global batch of {} samples (sizes: {:?})",
            sampler.global_batch_size(),
            sampler.source_sizes
        );
        Ok(sampler)
    }

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

    pub fn source_sizes(&self) -> &[usize] {
        &self.source_sizes
    }

    pub fn global_batch_size(&self) -> usize {
        self.global_batch_size
    }

    /// Sum over sources of the full global batches each one holds.
    pub fn batches_per_epoch(&self) -> usize {
        let global = self.global_batch_size();
        self.source_sizes.iter().map(|size| size / global).sum()
    }

    /// Global batches of `epoch` that were already consumed.
    fn skipped_batches(&self, epoch: usize) -> usize {
        if epoch != self.resume_epoch {
            return 0;
        }
        let per_epoch = self.batches_per_epoch();
        (self.consumed_samples / self.global_batch_size) % per_epoch
    }

    /// Order in which the epoch visits `(source, batch within source)`.
    fn plan(&self, rng: &mut impl Rng) -> Vec<(usize, usize)> {
        let global = self.global_batch_size();
        let mut remaining: Vec<usize> = self.source_sizes.iter().map(|size| size / global).collect();
        let mut drawn = vec![0usize; remaining.len()];
        let mut left: usize = remaining.iter().sum();
        let mut plan = Vec::with_capacity(left);

        while left > 0 {
            let mut pick = rng.random_range(0..left);
            let source = remaining
                .iter()
                .position(|&count| {
                    if pick < count {
                        true
                    } else {
                        pick -= count;
                        false
                    }
                })
                .unwrap_or(0);
            plan.push((source, drawn[source]));
            drawn[source] += 1;
            remaining[source] -= 1;
            left -= 1;
        }
        plan
    }

    /// Iterates the epoch stored in the sampler.
    pub fn iter_current(&self) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        self.iter(self.epoch)
    }
}

impl Sampler for PropMixingRandomSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let mut rng = epoch_rng(self.base_seed, epoch);
        let global = self.global_batch_size();

        let mut offset = 0;
        let permutations: Vec<Vec<usize>> = self
            .source_sizes
            .iter()
            .map(|&size| {
                let mut local: Vec<usize> = (offset..offset + size).collect();
                local.shuffle(&mut rng);
                offset += size;
                local
            })
            .collect();

        let plan = self.plan(&mut rng);
        let rank_start = self.data_parallel_rank * self.micro_batch_size;
        let micro = self.micro_batch_size;

        Box::new(
            plan.into_iter()
                .skip(self.skipped_batches(epoch))
                .map(move |(source, batch)| {
                    let start = batch * global + rank_start;
                    permutations[source][start..start + micro].to_vec()
                }),
        )
    }

    fn expected_len(&self) -> Option<usize> {
        self.expected_len_at(self.epoch)
    }

    fn expected_len_at(&self, epoch: usize) -> Option<usize> {
        Some(self.batches_per_epoch() - self.skipped_batches(epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn source_of(index: usize, sizes: &[usize]) -> usize {
        let mut end = 0;
        for (source, size) in sizes.iter().enumerate() {
            end += size;
            if index < end {
                return source;
            }
        }
        panic!("index {} outside of all sources", index);
    }

    #[test]
    fn validates_arguments() {
        assert!(PropMixingRandomSampler::new(vec![], 0, 2, 0, 1, 0).is_err());
        assert!(PropMixingRandomSampler::new(vec![10], 0, 0, 0, 1, 0).is_err());
        assert!(PropMixingRandomSampler::new(vec![10], 0, 2, 1, 1, 0).is_err());
        // global batch of 8 fits in neither source
        assert!(PropMixingRandomSampler::new(vec![5, 7], 0, 4, 0, 2, 0).is_err());
        assert!(PropMixingRandomSampler::new(vec![5, 8], 0, 4, 0, 2, 0).is_ok());
        assert!(PropMixingRandomSampler::new(vec![10], 0, usize::MAX / 2 + 1, 0, 2, 0).is_err());
    }

    #[test]
    fn global_batches_come_from_one_source() -> Result<()> {
        let sizes = vec![40, 13, 27];
        let (micro, world) = (2, 3);
        let per_rank: Vec<Vec<Vec<usize>>> = (0..world)
            .map(|rank| {
                PropMixingRandomSampler::new(sizes.clone(), 0, micro, rank, world, 4)
                    .map(|s| s.iter(4).collect())
            })
            .collect::<Result<_>>()?;

        let steps = per_rank[0].len();
        assert_eq!(steps, 40 / 6 + 13 / 6 + 27 / 6);

        let mut seen = HashSet::new();
        for step in 0..steps {
            let global: Vec<usize> = per_rank.iter().flat_map(|b| b[step].clone()).collect();
            let source = source_of(global[0], &sizes);
            assert!(global.iter().all(|&i| source_of(i, &sizes) == source));
            for index in global {
                assert!(seen.insert(index), "index {} visited twice", index);
            }
        }
        assert_eq!(seen.len(), steps * micro * world);
        Ok(())
    }

    #[test]
    fn sources_are_consumed_in_proportion() -> Result<()> {
        let sizes = vec![800, 200];
        let sampler = PropMixingRandomSampler::new(sizes.clone(), 0, 10, 0, 1, 0)?;
        let first_half: Vec<usize> = sampler
            .iter(0)
            .take(50)
            .map(|batch| source_of(batch[0], &sizes))
            .collect();
        let from_small = first_half.iter().filter(|&&s| s == 1).count();
        // expected 10 of 50; far from exhausting the small source up front
        assert!(from_small > 2 && from_small < 20, "got {}", from_small);
        Ok(())
    }

    #[test]
    fn deterministic_per_epoch() -> Result<()> {
        let sampler = PropMixingRandomSampler::new(vec![30, 30], 0, 3, 1, 2, 0)?;
        let epoch2: Vec<_> = sampler.iter(2).collect();
        assert_eq!(epoch2, sampler.iter(2).collect::<Vec<_>>());
        assert_ne!(epoch2, sampler.iter(3).collect::<Vec<_>>());

        let mut moved = sampler.clone();
        moved.set_epoch(2);
        assert_eq!(moved.iter_current().collect::<Vec<_>>(), epoch2);
        Ok(())
    }

    #[test]
    fn resume_skips_whole_global_batches() -> Result<()> {
        let fresh = PropMixingRandomSampler::new(vec![50, 20], 0, 2, 0, 2, 1)?;
        let resumed = PropMixingRandomSampler::new(vec![50, 20], 12, 2, 0, 2, 1)?;
        let skipped: Vec<_> = fresh.iter(1).skip(3).collect();
        assert_eq!(skipped, resumed.iter(1).collect::<Vec<_>>());
        assert_eq!(resumed.expected_len(), Some(fresh.batches_per_epoch() - 3));
        Ok(())
    }

    #[test]
    fn epochs_after_the_resumed_one_are_full() -> Result<()> {
        let fresh = PropMixingRandomSampler::new(vec![50, 20], 0, 2, 0, 2, 1)?;
        let resumed = PropMixingRandomSampler::new(vec![50, 20], 12, 2, 0, 2, 1)?;
        assert_eq!(resumed.expected_len_at(2), Some(fresh.batches_per_epoch()));
        assert_eq!(
            resumed.iter(2).collect::<Vec<_>>(),
            fresh.iter(2).collect::<Vec<_>>()
        );

        let mut next = resumed.clone();
        next.set_epoch(2);
        assert_eq!(next.iter_current().count(), fresh.batches_per_epoch());
        Ok(())
    }
}
