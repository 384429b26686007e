pub mod collator;
pub mod consumed;
pub mod datamodule;
pub mod dataloader;
pub mod dataset;
pub mod minibatch;
pub mod registry;
pub mod sample;
pub mod sampler;
pub mod text;

pub use collator::{Collator, PaddingCollator, PaddingRule, StackCollator};
pub use consumed::{resolve_consumed_samples, TrainerState, TrainingHyperParams};
pub use datamodule::{DataModuleConfig, PretrainDataModule};
pub use dataloader::{DataLoader, DataLoaderConfig};
pub use dataset::{ConcatDataset, Dataset, DatasetSplits, InMemoryDataset};
pub use minibatch::MiniBatch;
pub use registry::{resolve_datasets, DatasetRegistry, InMemoryRegistry};
pub use sample::Sample;
pub use sampler::{
    BatchSampler, DistributedSampler, PretrainingRandomSampler, PretrainingSampler, PropMixingRandomSampler,
    RandomSampler, Sampler, SamplerType, SequentialSampler,
};
