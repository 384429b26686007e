use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// The `Sample` struct represents a single tokenized training example.
///
/// It maps feature names (e.g., `"input_ids"`, `"labels"`) to token-id
/// sequences. Sequences of one sample may differ in length; a collator decides
/// how they line up across a batch.
///
/// # Examples:
/// - A dialogue turn: `{"input_ids": [101, 872, 1962, 102], "labels": [872, 1962, 102, -100]}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub features: HashMap<String, Vec<i64>>,
}

impl Sample {
    /// Creates a new `Sample` from a full feature map.
    pub fn new(features: HashMap<String, Vec<i64>>) -> Self {
        Self { features }
    }

    /// Creates a `Sample` from a single `(feature_name, ids)` pair.
    ///
    /// Chain with [`with_feature`](Self::with_feature) to add more features.
    pub fn from_single(name: impl Into<String>, ids: impl Into<Vec<i64>>) -> Self {
        Self {
            features: HashMap::from([(name.into(), ids.into())]),
        }
    }

    /// Adds or overwrites a feature in the `Sample`.
    pub fn with_feature(mut self, name: impl Into<String>, ids: impl Into<Vec<i64>>) -> Self {
        self.features.insert(name.into(), ids.into());
        self
    }

    /// Returns the ids of a feature.
    pub fn get(&self, feature: &str) -> Result<&[i64]> {
        self.features
            .get(feature)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("Feature {} not found", feature))
    }

    /// Returns an iterator over all feature names in this `Sample`.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod sample_test {
    use super::*;

    #[test]
    fn test_sample_basic_construction() -> Result<()> {
        let sample = Sample::from_single("input_ids", vec![101, 42, 102])
            .with_feature("labels", [42, 102, -100]);

        assert_eq!(sample.get("input_ids")?, &[101, 42, 102]);
        assert_eq!(sample.get("labels")?[2], -100);
        assert!(sample.get("missing").is_err());

        let mut features: Vec<_> = sample.features().collect();
        features.sort();
        assert_eq!(features, vec!["input_ids", "labels"]);
        Ok(())
    }
}
