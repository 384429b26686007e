use crate::collator::Collator;
use crate::sample::Sample;
use anyhow::{anyhow, Result};
use ndarray::{Array2, ArrayView1};
use std::collections::HashMap;

/// The `MiniBatch` struct represents a batch of samples grouped for model input.
///
/// Every feature is a `[batch_size, seq_len]` array of token ids. Features
/// may have different `seq_len`s from each other, but within one feature all
/// rows share a length (padding makes that so).
///
/// # Examples
/// Collating 4 samples whose `"input_ids"` are at most 128 tokens long with
/// padding to the batch maximum gives:
/// - `"input_ids"` -> shape `[4, 128]`
/// - `"attention_mask"` -> shape `[4, 128]`
#[derive(Debug, Clone, PartialEq)]
pub struct MiniBatch {
    pub arrays: HashMap<String, Array2<i64>>,
}

impl MiniBatch {
    /// Constructs a `MiniBatch` by applying the given [`Collator`] to a
    /// list of individual [`Sample`]s.
    ///
    /// Example:
    /// // Stack-only default
    /// let batch = MiniBatch::collate(samples, &StackCollator);
    pub fn collate<C>(samples: Vec<Sample>, collator: &C) -> Result<Self>
    where
        C: Collator<Sample, Batch = MiniBatch> + ?Sized,
    {
        collator.collate(samples)
    }

    /// Returns the number of samples in the batch.
    pub fn batch_size(&self) -> Result<usize> {
        self.arrays
            .values()
            .next()
            .map(|a| a.nrows())
            .ok_or(anyhow!("Empty mini-batch"))
    }

    /// Returns the array for a given feature key.
    pub fn get(&self, feature: &str) -> Result<&Array2<i64>> {
        self.arrays
            .get(feature)
            .ok_or_else(|| anyhow!("Feature '{}' not found in mini-batch", feature))
    }

    /// Returns row `index` of a feature.
    pub fn row(&self, feature: &str, index: usize) -> Result<ArrayView1<'_, i64>> {
        let array = self.get(feature)?;
        if index >= array.nrows() {
            return Err(anyhow!(
                "Row {} out of range for feature '{}' with {} rows",
                index,
                feature,
                array.nrows()
            ));
        }
        Ok(array.row(index))
    }

    /// Returns an iterator over all feature keys in the batch.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }
}
