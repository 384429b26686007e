//! Resolving a dataset name/subname pair into named splits.
//!
//! Loading itself is external: a [`DatasetRegistry`] knows how to fetch one
//! named (sub-)dataset and how to list the members of a dataset family. This
//! module only decides *what* to load and concatenates the pieces.

use anyhow::{Context, Result};
use log::info;
use std::collections::HashMap;

use crate::dataset::{ConcatDataset, Dataset, DatasetSplits, InMemoryDataset};

/// Family whose members can be concatenated by subname.
pub const AGGREGATED_FAMILY: &str = "dial";
/// Subname that concatenates every member of the family.
pub const BALANCE_SUBNAME: &str = "balance";
/// Member that already contains every other member; never concatenated.
pub const AGGREGATE_ENTRY: &str = "allmerge";
/// Splits built when concatenating.
pub const CONCAT_SPLITS: [&str; 3] = ["train", "test", "dev"];

/// Source of named datasets.
pub trait DatasetRegistry {
    type Dataset: Dataset;

    /// Loads every split of `name` (or of its member `subname`).
    fn load(&self, name: &str, subname: Option<&str>) -> Result<DatasetSplits<Self::Dataset>>;

    /// Lists the members of the family `name`.
    fn list(&self, name: &str) -> Result<Vec<String>>;
}

/// What a name/subname pair asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSelection {
    /// Load one (sub-)dataset as is.
    Single {
        name: String,
        subname: Option<String>,
    },
    /// Concatenate the listed members of a family.
    Concat { name: String, members: Vec<String> },
    /// Concatenate every member of a family except the aggregate entry.
    Balance { name: String },
}

impl DatasetSelection {
    pub fn parse(name: &str, subname: Option<&str>) -> Self {
        match subname {
            Some(BALANCE_SUBNAME) if name == AGGREGATED_FAMILY => DatasetSelection::Balance {
                name: name.to_string(),
            },
            Some(sub) if name == AGGREGATED_FAMILY && sub.contains('-') => {
                DatasetSelection::Concat {
                    name: name.to_string(),
                    members: sub
                        .split('-')
                        .filter(|member| !member.is_empty())
                        .map(str::to_string)
                        .collect(),
                }
            }
            _ if name != AGGREGATED_FAMILY => DatasetSelection::Single {
                name: name.to_string(),
                subname: None,
            },
            _ => DatasetSelection::Single {
                name: name.to_string(),
                subname: subname.map(str::to_string),
            },
        }
    }
}

/// Resolves `name`/`subname` against `registry`.
///
/// - A name outside the aggregated family ignores `subname` and is loaded
///   whole.
/// - `subname = "balance"` concatenates every member of the family except
///   the aggregate entry, per split (`train`, `test`, `dev`).
/// - A dash-separated subname (`"a-b-c"`) concatenates the listed members.
/// - Any other subname is loaded as a single member.
///
/// Every result is a [`ConcatDataset`], so callers can always ask for the
/// per-source sizes of a split. Registry errors are returned unchanged apart
/// from added context.
pub fn resolve_datasets<R: DatasetRegistry>(
    registry: &R,
    name: &str,
    subname: Option<&str>,
) -> Result<DatasetSplits<ConcatDataset<R::Dataset>>> {
    match DatasetSelection::parse(name, subname) {
        DatasetSelection::Single { name, subname } => {
            let splits = registry
                .load(&name, subname.as_deref())
                .with_context(|| format!("Failed to load dataset {}", name))?;
            Ok(splits.map(ConcatDataset::single))
        }
        DatasetSelection::Balance { name } => {
            let members: Vec<String> = registry
                .list(&name)
                .with_context(|| format!("Failed to list members of {}", name))?
                .into_iter()
                .filter(|member| member != AGGREGATE_ENTRY)
                .collect();
            concat_members(registry, &name, &members)
        }
        DatasetSelection::Concat { name, members } => concat_members(registry, &name, &members),
    }
}

fn concat_members<R: DatasetRegistry>(
    registry: &R,
    name: &str,
    members: &[String],
) -> Result<DatasetSplits<ConcatDataset<R::Dataset>>> {
    info!("concatenating {} members of {}: {:?}", members.len(), name, members);

    let mut loaded = members
        .iter()
        .map(|member| {
            registry
                .load(name, Some(member))
                .with_context(|| format!("Failed to load {}/{}", name, member))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut concatenated = DatasetSplits::new();
    for split in CONCAT_SPLITS {
        let parts = loaded
            .iter_mut()
            .zip(members)
            .map(|(splits, member)| {
                splits
                    .take(split)
                    .with_context(|| format!("Member {}/{} has no {} split", name, member, split))
            })
            .collect::<Result<Vec<_>>>()?;
        concatenated.insert(split, ConcatDataset::new(parts)?);
    }
    Ok(concatenated)
}

/// A registry backed by datasets registered up front.
///
/// Useful for tests and for small corpora already held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryRegistry<T> {
    entries: HashMap<(String, Option<String>), DatasetSplits<InMemoryDataset<T>>>,
}

impl<T> Default for InMemoryRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> InMemoryRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        subname: Option<&str>,
        splits: DatasetSplits<InMemoryDataset<T>>,
    ) -> Self {
        self.entries
            .insert((name.into(), subname.map(str::to_string)), splits);
        self
    }
}

impl<T> DatasetRegistry for InMemoryRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Dataset = InMemoryDataset<T>;

    fn load(&self, name: &str, subname: Option<&str>) -> Result<DatasetSplits<Self::Dataset>> {
        self.entries
            .get(&(name.to_string(), subname.map(str::to_string)))
            .cloned()
            .with_context(|| match subname {
                Some(sub) => format!("Unknown dataset {}/{}", name, sub),
                None => format!("Unknown dataset {}", name),
            })
    }

    fn list(&self, name: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = self
            .entries
            .keys()
            .filter(|(family, _)| family == name)
            .filter_map(|(_, subname)| subname.clone())
            .collect();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splits(train: usize, dev: usize, test: usize) -> DatasetSplits<InMemoryDataset<usize>> {
        DatasetSplits::new()
            .with_split("train", InMemoryDataset::new((0..train).collect()))
            .with_split("dev", InMemoryDataset::new((0..dev).collect()))
            .with_split("test", InMemoryDataset::new((0..test).collect()))
    }

    fn dial_registry() -> InMemoryRegistry<usize> {
        InMemoryRegistry::new()
            .register("dial", Some("chitchat"), splits(10, 2, 3))
            .register("dial", Some("knowledge"), splits(5, 1, 1))
            .register("dial", Some("persona"), splits(7, 4, 2))
            .register("dial", Some("allmerge"), splits(22, 7, 6))
            .register("wiki", None, splits(100, 10, 10))
    }

    #[test]
    fn parses_selections() {
        assert_eq!(
            DatasetSelection::parse("wiki", Some("balance")),
            DatasetSelection::Single {
                name: "wiki".into(),
                subname: None
            }
        );
        assert_eq!(
            DatasetSelection::parse("dial", Some("balance")),
            DatasetSelection::Balance {
                name: "dial".into()
            }
        );
        assert_eq!(
            DatasetSelection::parse("dial", Some("a-b")),
            DatasetSelection::Concat {
                name: "dial".into(),
                members: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(
            DatasetSelection::parse("dial", Some("persona")),
            DatasetSelection::Single {
                name: "dial".into(),
                subname: Some("persona".into())
            }
        );
    }

    #[test]
    fn balance_excludes_aggregate_entry() -> Result<()> {
        let resolved = resolve_datasets(&dial_registry(), "dial", Some("balance"))?;
        let train = resolved.split("train")?;
        assert_eq!(train.len(), 22);
        assert_eq!(train.sizes(), vec![10, 5, 7]);
        assert_eq!(resolved.split("dev")?.len(), 7);
        assert_eq!(resolved.split("test")?.len(), 6);
        Ok(())
    }

    #[test]
    fn dash_list_concatenates_named_members() -> Result<()> {
        let resolved = resolve_datasets(&dial_registry(), "dial", Some("persona-knowledge"))?;
        assert_eq!(resolved.split("train")?.sizes(), vec![7, 5]);
        Ok(())
    }

    #[test]
    fn single_member_and_other_families() -> Result<()> {
        let registry = dial_registry();
        let persona = resolve_datasets(&registry, "dial", Some("persona"))?;
        assert_eq!(persona.split("train")?.len(), 7);

        let wiki = resolve_datasets(&registry, "wiki", Some("ignored"))?;
        assert_eq!(wiki.split("train")?.sizes(), vec![100]);
        Ok(())
    }

    #[test]
    fn registry_errors_propagate() {
        let registry = dial_registry();
        let err = resolve_datasets(&registry, "dial", Some("persona-missing")).unwrap_err();
        assert!(format!("{:#}", err).contains("dial/missing"));
        assert!(resolve_datasets(&registry, "books", None).is_err());
    }
}
