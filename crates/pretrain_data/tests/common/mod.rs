#![allow(dead_code)]

use anyhow::Result;
use pretrain_data::{
    DatasetSplits, InMemoryDataset, InMemoryRegistry, MiniBatch, PaddingCollator, PaddingRule, Sample, TrainerState,
};

/// A tokenized sample whose first token is its id and whose length varies
/// with the id, so padding is exercised and batches can be traced back.
pub fn sample(id: i64) -> Sample {
    let len = 1 + (id.rem_euclid(4)) as usize;
    let input_ids: Vec<i64> = std::iter::once(id).chain((1..len as i64).map(|t| 1000 + t)).collect();
    let labels: Vec<i64> = input_ids.iter().skip(1).copied().chain(std::iter::once(-100)).collect();
    Sample::from_single("input_ids", input_ids).with_feature("labels", labels)
}

pub fn samples(ids: std::ops::Range<i64>) -> InMemoryDataset<Sample> {
    InMemoryDataset::new(ids.map(sample).collect())
}

pub fn dialogue_collator() -> PaddingCollator {
    PaddingCollator::new()
        .pad("input_ids", PaddingRule::MaxLength, 0)
        .pad("labels", PaddingRule::MaxLength, -100)
        .with_attention_mask("input_ids")
}

/// Sample ids of a collated batch, in row order.
pub fn batch_ids(batch: &MiniBatch) -> Result<Vec<i64>> {
    Ok(batch.get("input_ids")?.column(0).to_vec())
}

fn member(base: i64, train: i64, dev: i64, test: i64) -> DatasetSplits<InMemoryDataset<Sample>> {
    DatasetSplits::new()
        .with_split("train", samples(base..base + train))
        .with_split("dev", samples(base + 10_000..base + 10_000 + dev))
        .with_split("test", samples(base + 20_000..base + 20_000 + test))
}

/// A `dial` family with three members plus the aggregate entry, and a
/// standalone `wiki` corpus.
///
/// Member train ids: chitchat 0..48, knowledge 100..116, persona 200..232.
pub fn dialogue_registry() -> InMemoryRegistry<Sample> {
    InMemoryRegistry::new()
        .register("dial", Some("chitchat"), member(0, 48, 6, 6))
        .register("dial", Some("knowledge"), member(100, 16, 2, 2))
        .register("dial", Some("persona"), member(200, 32, 4, 4))
        .register("dial", Some("allmerge"), member(900, 96, 12, 12))
        .register(
            "wiki",
            None,
            DatasetSplits::new()
                .with_split("train", samples(0..64))
                .with_split("validation", samples(500..510))
                .with_split("test", samples(600..605)),
        )
}

pub fn trainer(global_step: u64, rank: usize, world_size: usize, epoch: usize) -> TrainerState {
    TrainerState {
        global_step,
        world_size,
        global_rank: rank,
        current_epoch: epoch,
        model_consumed_samples: None,
    }
}
