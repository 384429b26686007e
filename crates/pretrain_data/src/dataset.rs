use anyhow::{anyhow, ensure, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A `Dataset` gives random access to a fixed number of items.
///
/// Samplers only ever need `len()`; the data loader calls `get()` with the
/// indices they produce. Implementations must be `Send + Sync` so loader
/// workers can share one dataset.
pub trait Dataset: Send + Sync {
    type Item: Send + 'static;

    /// Number of items.
    fn len(&self) -> usize;

    /// Returns the item at `index`, or `None` when out of range.
    fn get(&self, index: usize) -> Option<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Option<Self::Item> {
        (**self).get(index)
    }
}

/// A dataset held in one contiguous `Arc<[T]>`.
///
/// Cloning only bumps the reference count, so the same items can be handed
/// to every loader worker and to every split view without copying.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<T> {
    items: Arc<[T]>,
    metadata: HashMap<String, String>,
}

impl<T> InMemoryDataset<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
            metadata: HashMap::new(),
        }
    }

    /// Adds/updates metadata and returns the modified dataset.
    /// Enables chaining: `dataset.with_metadata("source", "train")`.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T> Dataset for InMemoryDataset<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).cloned()
    }
}

/// Several datasets viewed as one.
///
/// Global index `i` falls into the first dataset whose cumulative size exceeds
/// it. The per-source sizes stay available through [`sizes`](Self::sizes) so
/// a mixing sampler can weigh the sources.
///
/// ```text
/// sizes:      [3, 0, 2]
/// cumulative: [3, 3, 5]
/// index 3 -> dataset 2, local index 0
/// ```
#[derive(Debug, Clone)]
pub struct ConcatDataset<D> {
    datasets: Vec<D>,
    cumulative_sizes: Vec<usize>,
}

impl<D: Dataset> ConcatDataset<D> {
    pub fn new(datasets: Vec<D>) -> Result<Self> {
        ensure!(
            !datasets.is_empty(),
            "ConcatDataset needs at least one dataset"
        );
        let cumulative_sizes = datasets
            .iter()
            .scan(0usize, |total, dataset| {
                *total += dataset.len();
                Some(*total)
            })
            .collect();
        Ok(Self {
            datasets,
            cumulative_sizes,
        })
    }

    /// Wraps a single dataset.
    pub fn single(dataset: D) -> Self {
        let len = dataset.len();
        Self {
            datasets: vec![dataset],
            cumulative_sizes: vec![len],
        }
    }

    pub fn datasets(&self) -> &[D] {
        &self.datasets
    }

    /// Length of every source, in concatenation order.
    pub fn sizes(&self) -> Vec<usize> {
        self.datasets.iter().map(Dataset::len).collect()
    }

    /// Maps a global index to `(source, local index)`.
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        let source = self.cumulative_sizes.partition_point(|&end| end <= index);
        if source == self.datasets.len() {
            return None;
        }
        let start = if source == 0 {
            0
        } else {
            self.cumulative_sizes[source - 1]
        };
        Some((source, index - start))
    }
}

impl<D: Dataset> Dataset for ConcatDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.cumulative_sizes.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Option<Self::Item> {
        let (source, local) = self.locate(index)?;
        self.datasets[source].get(local)
    }
}

/// Named splits of one logical dataset (`train`, `dev`, `validation`, `test`, ...).
#[derive(Debug, Clone)]
pub struct DatasetSplits<D> {
    splits: BTreeMap<String, D>,
}

impl<D> Default for DatasetSplits<D> {
    fn default() -> Self {
        Self {
            splits: BTreeMap::new(),
        }
    }
}

impl<D> DatasetSplits<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, name: impl Into<String>, dataset: D) -> Self {
        self.splits.insert(name.into(), dataset);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, dataset: D) {
        self.splits.insert(name.into(), dataset);
    }

    /// Returns the split, or an error naming it and the splits that exist.
    pub fn split(&self, name: &str) -> Result<&D> {
        self.splits.get(name).ok_or_else(|| {
            anyhow!(
                "Dataset split '{}' not found (available: {:?})",
                name,
                self.names().collect::<Vec<_>>()
            )
        })
    }

    /// Removes and returns the split.
    pub fn take(&mut self, name: &str) -> Result<D> {
        let available: Vec<String> = self.splits.keys().cloned().collect();
        self.splits
            .remove(name)
            .ok_or_else(|| anyhow!("Dataset split '{}' not found (available: {:?})", name, available))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.splits.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Applies `f` to every split, keeping the names.
    pub fn map<E>(self, mut f: impl FnMut(D) -> E) -> DatasetSplits<E> {
        DatasetSplits {
            splits: self
                .splits
                .into_iter()
                .map(|(name, dataset)| (name, f(dataset)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(range: std::ops::Range<i64>) -> InMemoryDataset<i64> {
        InMemoryDataset::new(range.collect())
    }

    mod in_memory_dataset_tests {
        use super::*;

        #[test]
        fn random_access() {
            let dataset = numbers(10..13);
            assert_eq!(dataset.len(), 3);
            assert_eq!(dataset.get(1), Some(11));
            assert_eq!(dataset.get(3), None);
        }

        #[test]
        fn metadata_ops() {
            let dataset = numbers(0..1).with_metadata("source", "dial");
            assert_eq!(dataset.metadata("source"), Some("dial"));
            assert!(dataset.metadata("missing").is_none());
        }

        #[test]
        fn shared_across_threads() {
            let dataset = Arc::new(numbers(0..100));
            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let dataset = dataset.clone();
                    std::thread::spawn(move || (0..100).filter_map(|i| dataset.get(i)).sum::<i64>())
                })
                .collect();
            for t in threads {
                assert_eq!(t.join().unwrap(), 4950);
            }
        }
    }

    mod concat_dataset_tests {
        use super::*;

        #[test]
        fn maps_global_indices_across_sources() -> Result<()> {
            let concat = ConcatDataset::new(vec![numbers(0..3), numbers(100..100), numbers(10..12)])?;
            assert_eq!(concat.len(), 5);
            assert_eq!(concat.sizes(), vec![3, 0, 2]);
            let all: Vec<_> = (0..concat.len()).filter_map(|i| concat.get(i)).collect();
            assert_eq!(all, vec![0, 1, 2, 10, 11]);
            assert_eq!(concat.locate(3), Some((2, 0)));
            assert_eq!(concat.get(5), None);
            Ok(())
        }

        #[test]
        fn rejects_empty_source_list() {
            assert!(ConcatDataset::<InMemoryDataset<i64>>::new(vec![]).is_err());
        }

        #[test]
        fn single_wraps_one_dataset() {
            let concat = ConcatDataset::single(numbers(0..4));
            assert_eq!(concat.len(), 4);
            assert_eq!(concat.datasets().len(), 1);
        }
    }

    mod dataset_splits_tests {
        use super::*;

        #[test]
        fn missing_split_names_it() {
            let splits = DatasetSplits::new().with_split("train", numbers(0..2));
            let err = splits.split("validation").unwrap_err().to_string();
            assert!(err.contains("validation"));
            assert!(err.contains("train"));
        }

        #[test]
        fn map_keeps_names() -> Result<()> {
            let splits = DatasetSplits::new()
                .with_split("train", numbers(0..2))
                .with_split("test", numbers(0..1))
                .map(ConcatDataset::single);
            assert_eq!(splits.names().collect::<Vec<_>>(), vec!["test", "train"]);
            assert_eq!(splits.split("train")?.len(), 2);
            Ok(())
        }
    }
}
