//! Training/validation/test loaders for pretraining on a named dataset.
//!
//! [`PretrainDataModule`] resolves the dataset once, then builds loaders on
//! demand from the trainer's current state. The training loader uses one of
//! the resumable pretraining samplers, so a run restarted from a checkpoint
//! continues with the samples it had not seen yet.

use anyhow::{Context, Result};
use clap::Args;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::collator::Collator;
use crate::consumed::{resolve_consumed_samples, TrainerState, TrainingHyperParams};
use crate::dataloader::{BoxedBatchSampler, DataLoader, DataLoaderConfig};
use crate::dataset::{ConcatDataset, Dataset, DatasetSplits};
use crate::registry::{resolve_datasets, DatasetRegistry};
use crate::sampler::{
    DistributedSampler, PretrainingRandomSampler, PretrainingSampler, PropMixingRandomSampler, SamplerType,
};

/// Data-module settings, loadable from JSON and overridable on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct DataModuleConfig {
    /// Loader workers for the shuffled training loader and for validation
    #[arg(long, default_value_t = 8)]
    pub num_workers: usize,

    /// Loader workers for the custom-sampler training loader and for test
    #[arg(long, default_value_t = 2)]
    pub dataloader_workers: usize,

    /// Per-rank micro-batch size for training
    #[arg(long, default_value_t = 32)]
    pub train_batchsize: usize,

    #[arg(long, default_value_t = 32)]
    pub val_batchsize: usize,

    #[arg(long, default_value_t = 32)]
    pub test_batchsize: usize,

    #[arg(long, default_value = "dial")]
    pub datasets_name: String,

    /// Member of the dataset family: a name, `balance`, or `a-b-c`
    #[arg(long)]
    pub datasets_subname: Option<String>,

    #[arg(long, default_value = "train")]
    pub train_datasets_field: String,

    #[arg(long, default_value = "validation")]
    pub val_datasets_field: String,

    #[arg(long, default_value = "test")]
    pub test_datasets_field: String,

    /// single, random, mixing or mixing_balance
    #[arg(long, default_value_t = SamplerType::Random)]
    pub sampler_type: SamplerType,

    /// Use a plain shuffled loader instead of the resumable sampler
    #[arg(long)]
    pub replace_sampler_ddp: bool,

    #[arg(long, default_value_t = 1)]
    pub accumulate_grad_batches: usize,

    /// Base seed of every shuffling sampler
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl Default for DataModuleConfig {
    fn default() -> Self {
        Self {
            num_workers: 8,
            dataloader_workers: 2,
            train_batchsize: 32,
            val_batchsize: 32,
            test_batchsize: 32,
            datasets_name: "dial".to_string(),
            datasets_subname: None,
            train_datasets_field: "train".to_string(),
            val_datasets_field: "validation".to_string(),
            test_datasets_field: "test".to_string(),
            sampler_type: SamplerType::Random,
            replace_sampler_ddp: false,
            accumulate_grad_batches: 1,
            seed: 0,
        }
    }
}

impl DataModuleConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn hyper_params(&self) -> TrainingHyperParams {
        TrainingHyperParams {
            train_batchsize: self.train_batchsize,
            accumulate_grad_batches: self.accumulate_grad_batches,
        }
    }
}

/// Owns the resolved dataset splits and builds loaders over them.
pub struct PretrainDataModule<D, C> {
    datasets: DatasetSplits<ConcatDataset<D>>,
    collator: C,
    config: DataModuleConfig,
}

impl<D, C> PretrainDataModule<D, C>
where
    D: Dataset + Clone + 'static,
    C: Collator<D::Item> + Clone + 'static,
{
    /// Resolves `config.datasets_name`/`datasets_subname` against `registry`.
    pub fn new<R>(registry: &R, collator: C, config: DataModuleConfig) -> Result<Self>
    where
        R: DatasetRegistry<Dataset = D>,
    {
        info!("begin to load datasets {}", config.datasets_name);
        let datasets = resolve_datasets(registry, &config.datasets_name, config.datasets_subname.as_deref())?;
        info!("ending load datasets {}", config.datasets_name);
        Ok(Self::from_splits(datasets, collator, config))
    }

    /// Builds a data module over splits that are already loaded.
    pub fn from_splits(datasets: DatasetSplits<ConcatDataset<D>>, collator: C, config: DataModuleConfig) -> Self {
        Self {
            datasets,
            collator,
            config,
        }
    }

    pub fn config(&self) -> &DataModuleConfig {
        &self.config
    }

    pub fn datasets(&self) -> &DatasetSplits<ConcatDataset<D>> {
        &self.datasets
    }

    /// The resumable batch sampler for the training split on this rank.
    pub fn custom_sampler(&self, state: &TrainerState) -> Result<BoxedBatchSampler> {
        let consumed = resolve_consumed_samples(state, &self.config.hyper_params());
        let consumed = usize::try_from(consumed)
            .with_context(|| format!("consumed samples {} do not fit in usize", consumed))?;
        let train = self.datasets.split(&self.config.train_datasets_field)?;

        info!(
            "building {} sampler: total_samples={}, consumed_samples={}, rank={}/{}, epoch={}",
            self.config.sampler_type,
            train.len(),
            consumed,
            state.global_rank,
            state.world_size,
            state.current_epoch
        );

        let sampler: BoxedBatchSampler = match self.config.sampler_type {
            SamplerType::Random | SamplerType::Mixing => Box::new(
                PretrainingRandomSampler::new(
                    train.len(),
                    consumed,
                    self.config.train_batchsize,
                    state.global_rank,
                    state.world_size,
                    state.current_epoch,
                )?
                .with_base_seed(self.config.seed),
            ),
            SamplerType::Single => Box::new(
                PretrainingSampler::new(
                    train.len(),
                    consumed,
                    self.config.train_batchsize,
                    state.global_rank,
                    state.world_size,
                )?
                .with_epoch(state.current_epoch),
            ),
            SamplerType::MixingBalance => Box::new(
                PropMixingRandomSampler::new(
                    train.sizes(),
                    consumed,
                    self.config.train_batchsize,
                    state.global_rank,
                    state.world_size,
                    state.current_epoch,
                )?
                .with_base_seed(self.config.seed),
            ),
        };
        Ok(sampler)
    }

    pub fn train_dataloader(&self, state: &TrainerState) -> Result<DataLoader<ConcatDataset<D>, C>> {
        let train = self.datasets.split(&self.config.train_datasets_field)?.clone();

        if !self.config.replace_sampler_ddp {
            let config = DataLoaderConfig::builder()
                .num_workers(self.config.dataloader_workers)
                .start_epoch(state.current_epoch)
                .build();
            return DataLoader::with_batch_sampler(train, self.custom_sampler(state)?, config, self.collator.clone());
        }

        let config = DataLoaderConfig::builder()
            .batch_size(self.config.train_batchsize)
            .num_workers(self.config.num_workers)
            .shuffle(true)
            .seed(self.config.seed)
            .start_epoch(state.current_epoch)
            .build();
        DataLoader::new(train, config, self.collator.clone())
    }

    pub fn val_dataloader(&self, state: &TrainerState) -> Result<DataLoader<ConcatDataset<D>, C>> {
        self.eval_dataloader(
            state,
            &self.config.val_datasets_field,
            self.config.val_batchsize,
            self.config.num_workers,
        )
    }

    pub fn test_dataloader(&self, state: &TrainerState) -> Result<DataLoader<ConcatDataset<D>, C>> {
        self.eval_dataloader(
            state,
            &self.config.test_datasets_field,
            self.config.test_batchsize,
            self.config.dataloader_workers,
        )
    }

    /// Non-shuffled loader over this rank's share of `field`.
    fn eval_dataloader(
        &self,
        state: &TrainerState,
        field: &str,
        batch_size: usize,
        num_workers: usize,
    ) -> Result<DataLoader<ConcatDataset<D>, C>> {
        let dataset = self.datasets.split(field)?.clone();
        let sampler = DistributedSampler::new(
            dataset.len(),
            state.world_size,
            state.global_rank,
            false,
            false,
            self.config.seed,
        )
        .with_context(|| format!("Failed to build distributed sampler for split '{}'", field))?;

        let config = DataLoaderConfig::builder()
            .batch_size(batch_size)
            .num_workers(num_workers)
            .build();
        DataLoader::with_sampler(dataset, sampler, config, self.collator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: DataModuleConfig,
    }

    type Collate = fn(Vec<usize>) -> Result<Vec<usize>>;

    fn module(sampler_type: SamplerType, sizes: &[usize]) -> Result<PretrainDataModule<InMemoryDataset<usize>, Collate>> {
        let mut offset = 0;
        let sources: Vec<InMemoryDataset<usize>> = sizes
            .iter()
            .map(|&size| {
                let dataset = InMemoryDataset::new((offset..offset + size).collect());
                offset += size;
                dataset
            })
            .collect();
        let splits = DatasetSplits::new()
            .with_split("train", ConcatDataset::new(sources)?)
            .with_split("validation", ConcatDataset::single(InMemoryDataset::new((0..10).collect())))
            .with_split("test", ConcatDataset::single(InMemoryDataset::new((100..105).collect())));
        let config = DataModuleConfig {
            train_batchsize: 2,
            val_batchsize: 3,
            test_batchsize: 2,
            num_workers: 0,
            dataloader_workers: 0,
            sampler_type,
            ..DataModuleConfig::default()
        };
        let collate: Collate = |items| Ok(items);
        Ok(PretrainDataModule::from_splits(splits, collate, config))
    }

    fn state(global_step: u64, rank: usize, world: usize, epoch: usize) -> TrainerState {
        TrainerState {
            global_step,
            world_size: world,
            global_rank: rank,
            current_epoch: epoch,
            model_consumed_samples: None,
        }
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let cli = Cli::parse_from(["prog"]);
        assert_eq!(cli.config, DataModuleConfig::default());

        let cli = Cli::parse_from(["prog", "--sampler-type", "mixing_balance", "--replace-sampler-ddp"]);
        assert_eq!(cli.config.sampler_type, SamplerType::MixingBalance);
        assert!(cli.config.replace_sampler_ddp);
    }

    #[test]
    fn rejects_unknown_sampler_type() {
        assert!(Cli::try_parse_from(["prog", "--sampler-type", "uniform"]).is_err());
        let parsed: std::result::Result<DataModuleConfig, _> = serde_json::from_str(r#"{"sampler_type": "uniform"}"#);
        assert!(parsed.unwrap_err().to_string().contains("Unknown sampler type: uniform"));
    }

    #[test]
    fn single_sampler_skips_consumed_batches() -> Result<()> {
        let module = module(SamplerType::Single, &[20])?;
        // global_step 3 -> (3 - 1) * 2 * 2 * 1 = 8 samples consumed
        let loader = module.train_dataloader(&state(3, 1, 2, 0))?;
        let batches = loader.iter()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(batches[0], vec![10, 11]);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.last(), Some(&vec![18, 19]));
        Ok(())
    }

    #[test]
    fn random_and_mixing_pick_the_random_sampler() -> Result<()> {
        let random = module(SamplerType::Random, &[20])?;
        let mixing = module(SamplerType::Mixing, &[20])?;
        let trainer = state(0, 0, 2, 1);
        let a: Vec<_> = random.custom_sampler(&trainer)?.iter(1).collect();
        let b: Vec<_> = mixing.custom_sampler(&trainer)?.iter(1).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);

        let single: Vec<_> = module(SamplerType::Single, &[20])?
            .custom_sampler(&trainer)?
            .iter(1)
            .collect();
        assert_ne!(a, single);
        Ok(())
    }

    #[test]
    fn mixing_balance_uses_source_sizes() -> Result<()> {
        let module = module(SamplerType::MixingBalance, &[8, 4])?;
        let sampler = module.custom_sampler(&TrainerState::single_process())?;
        let batches: Vec<_> = sampler.iter(0).collect();
        assert_eq!(batches.len(), 6);
        for batch in batches {
            assert_eq!(batch[0] < 8, batch[1] < 8);
        }
        Ok(())
    }

    #[test]
    fn train_loader_starts_at_trainer_epoch() -> Result<()> {
        let module = module(SamplerType::Random, &[24])?;
        let loader = module.train_dataloader(&state(0, 0, 2, 3))?;
        assert_eq!(loader.epoch(), 3);
        let expected: Vec<_> = module.custom_sampler(&state(0, 0, 2, 3))?.iter(3).collect();
        let got = loader.iter()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(got, expected);
        assert_eq!(loader.epoch(), 4);
        Ok(())
    }

    #[test]
    fn replaced_sampler_shuffles_whole_split() -> Result<()> {
        let mut module = module(SamplerType::Random, &[10])?;
        module.config.replace_sampler_ddp = true;
        let loader = module.train_dataloader(&state(50, 0, 4, 0))?;
        let mut seen: Vec<usize> = loader.iter()?.collect::<Result<Vec<_>>>()?.concat();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn eval_loaders_shard_without_shuffling() -> Result<()> {
        let module = module(SamplerType::Random, &[10])?;
        let val = module.val_dataloader(&state(0, 1, 3, 0))?;
        let batches = val.iter()?.collect::<Result<Vec<_>>>()?;
        // 10 samples padded to 12, rank 1 of 3 -> [1, 4, 7, 0]
        assert_eq!(batches, vec![vec![1, 4, 7], vec![0]]);

        let test = module.test_dataloader(&state(0, 0, 1, 0))?;
        let batches = test.iter()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(batches, vec![vec![100, 101], vec![102, 103], vec![104]]);
        Ok(())
    }

    #[test]
    fn missing_split_is_reported() -> Result<()> {
        let mut module = module(SamplerType::Random, &[10])?;
        module.config.val_datasets_field = "dev".to_string();
        let err = module.val_dataloader(&state(0, 0, 1, 0)).err().map(|e| e.to_string());
        assert!(err.is_some_and(|msg| msg.contains("dev")));
        Ok(())
    }
}
