use crate::minibatch::MiniBatch;
use crate::sample::Sample;
use crate::text::{padding_to_maxlength, truncate_tokens};
use anyhow::{bail, Context, Result};
use ndarray::Array2;
use std::collections::{HashMap, HashSet};

/// A `Collator` defines how a list of fetched items becomes one batch.
///
/// Any `Fn(Vec<T>) -> Result<B>` closure is a collator, so a plain collate
/// function can be handed to the data loader directly.
pub trait Collator<T>: Send + Sync {
    type Batch: Send + 'static;

    fn collate(&self, items: Vec<T>) -> Result<Self::Batch>;
}

impl<T, B, F> Collator<T> for F
where
    F: Fn(Vec<T>) -> Result<B> + Send + Sync,
    B: Send + 'static,
{
    type Batch = B;

    fn collate(&self, items: Vec<T>) -> Result<B> {
        self(items)
    }
}

/// Checks that every sample carries exactly the feature keys of the first one.
fn validate_keys(samples: &[Sample]) -> Result<Vec<String>> {
    if samples.is_empty() {
        bail!("Cannot collate empty sample list");
    }

    let first_keys: HashSet<&String> = samples[0].features.keys().collect();
    for (i, sample) in samples.iter().enumerate().skip(1) {
        let missing_keys: Vec<&String> = first_keys
            .iter()
            .filter(|&&k| !sample.features.contains_key(k))
            .cloned()
            .collect();

        let extra_keys: Vec<&String> = sample
            .features
            .keys()
            .filter(|k| !first_keys.contains(k))
            .collect();

        if !missing_keys.is_empty() || !extra_keys.is_empty() {
            bail!(
                "Sample #{} has mismatch feature keys:\n -Missing: {:?}\n -Extra: {:?}",
                i,
                missing_keys,
                extra_keys
            )
        }
    }
    Ok(first_keys.into_iter().cloned().collect())
}

fn rows_to_array(rows: Vec<Vec<i64>>, width: usize, feature: &str) -> Result<Array2<i64>> {
    let height = rows.len();
    let flat: Vec<i64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((height, width), flat)
        .with_context(|| format!("Failed to build [{}, {}] array for '{}'", height, width, feature))
}

/// A `Collator` that stacks token-id features of identical length along the
/// batch dimension. It does not pad, so a length mismatch is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCollator;

impl Collator<Sample> for StackCollator {
    type Batch = MiniBatch;

    fn collate(&self, mut samples: Vec<Sample>) -> Result<MiniBatch> {
        let keys = validate_keys(&samples)?;

        let mut arrays = HashMap::with_capacity(keys.len());
        for key in keys {
            let rows: Vec<Vec<i64>> = samples
                .iter_mut()
                .map(|s| s.features.remove(&key).unwrap_or_default())
                .collect();

            let reference_len = rows[0].len();
            for (i, row) in rows.iter().enumerate() {
                if row.len() != reference_len {
                    bail!(
                        "Length mismatch in sample {} for feature '{}': expected {}, got {}",
                        i,
                        key,
                        reference_len,
                        row.len()
                    );
                }
            }

            let array = rows_to_array(rows, reference_len, &key)?;
            arrays.insert(key, array);
        }
        Ok(MiniBatch { arrays })
    }
}

//=======================================================================================================
/// Target length of a padded feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingRule {
    // Pad to the longest sequence of the batch
    MaxLength,
    // Pad (or truncate) to exactly this length
    Fixed(usize),
}

#[derive(Debug, Clone, Copy)]
struct PadSpec {
    rule: PaddingRule,
    pad_id: i64,
}

/// A `Collator` that right-pads variable-length token sequences so they can
/// be stacked into a [`MiniBatch`].
///
/// Padding is configured per feature with [`pad`](Self::pad). Features
/// without a rule must already have equal lengths across the batch.
/// [`with_attention_mask`](Self::with_attention_mask) additionally emits an
/// `"attention_mask"` array for one padded feature.
///
/// # Example
/// ```ignore
/// let collator = PaddingCollator::new()
///     .pad("input_ids", PaddingRule::MaxLength, 0)
///     .pad("labels", PaddingRule::Fixed(512), -100)
///     .with_attention_mask("input_ids");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PaddingCollator {
    pad_config: HashMap<String, PadSpec>,
    mask_feature: Option<String>,
}

pub const ATTENTION_MASK: &str = "attention_mask";

impl PaddingCollator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the padding rule and pad id for a feature.
    pub fn pad(mut self, feature: impl ToString, rule: PaddingRule, pad_id: i64) -> Self {
        self.pad_config
            .insert(feature.to_string(), PadSpec { rule, pad_id });
        self
    }

    /// Emits `"attention_mask"` for `feature`, which must also be padded.
    pub fn with_attention_mask(mut self, feature: impl ToString) -> Self {
        self.mask_feature = Some(feature.to_string());
        self
    }

    fn target_length(rule: PaddingRule, rows: &[Vec<i64>]) -> usize {
        match rule {
            PaddingRule::MaxLength => rows.iter().map(Vec::len).max().unwrap_or(0),
            PaddingRule::Fixed(n) => n,
        }
    }
}

impl Collator<Sample> for PaddingCollator {
    type Batch = MiniBatch;

    fn collate(&self, mut samples: Vec<Sample>) -> Result<MiniBatch> {
        let keys = validate_keys(&samples)?;

        if let Some(mask_feature) = &self.mask_feature {
            if !self.pad_config.contains_key(mask_feature) {
                bail!("Attention mask requested for unpadded feature '{}'", mask_feature);
            }
            if !keys.contains(mask_feature) {
                bail!("Attention mask feature '{}' not found in samples", mask_feature);
            }
            if keys.iter().any(|k| k == ATTENTION_MASK) {
                bail!("Samples already carry an '{}' feature", ATTENTION_MASK);
            }
        }

        let mut batched = HashMap::with_capacity(keys.len() + 1);
        for key in keys {
            let rows: Vec<Vec<i64>> = samples
                .iter_mut()
                .map(|s| s.features.remove(&key).unwrap_or_default())
                .collect();

            let Some(spec) = self.pad_config.get(&key) else {
                // Stack-only
                let reference_len = rows[0].len();
                if rows.iter().any(|r| r.len() != reference_len) {
                    bail!("Length mismatch for non-padded feature '{}'", key);
                }
                let array = rows_to_array(rows, reference_len, &key)?;
                batched.insert(key, array);
                continue;
            };

            let target = Self::target_length(spec.rule, &rows);
            let (padded, masks): (Vec<Vec<i64>>, Vec<Vec<i64>>) = rows
                .iter()
                .map(|row| padding_to_maxlength(truncate_tokens(row.as_slice(), target, false), target, spec.pad_id))
                .unzip();

            if self.mask_feature.as_deref() == Some(key.as_str()) {
                batched.insert(ATTENTION_MASK.to_string(), rows_to_array(masks, target, ATTENTION_MASK)?);
            }
            let array = rows_to_array(padded, target, &key)?;
            batched.insert(key, array);
        }
        Ok(MiniBatch { arrays: batched })
    }
}

#[cfg(test)]
mod stackcollator_tests {
    use super::*;

    #[test]
    fn test_stack_collator_shape_mismatch() {
        let s1 = Sample::from_single("input_ids", vec![1, 2]);
        let s2 = Sample::from_single("input_ids", vec![1, 2, 3]);
        assert!(StackCollator.collate(vec![s1, s2]).is_err());
    }

    #[test]
    fn test_stack_collator_key_mismatch() {
        let s1 = Sample::from_single("input_ids", vec![1]);
        let s2 = Sample::from_single("labels", vec![0]);
        let err = StackCollator.collate(vec![s1, s2]).unwrap_err().to_string();
        assert!(err.contains("Sample #1"));
    }

    #[test]
    fn test_stack_collator_empty() {
        assert!(StackCollator.collate(Vec::new()).is_err());
    }

    #[test]
    fn test_closure_collator() -> Result<()> {
        let sum = |items: Vec<i64>| -> Result<i64> { Ok(items.iter().sum()) };
        assert_eq!(sum.collate(vec![1, 2, 3])?, 6);
        Ok(())
    }
}
