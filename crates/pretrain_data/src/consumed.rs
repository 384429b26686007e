//! Recovering the resume point of an interrupted run.

use log::info;
use serde::{Deserialize, Serialize};

/// What the trainer knows about its progress and topology.
///
/// `model_consumed_samples` is the exact counter kept by the model being
/// trained, when it keeps one. The other fields come from the trainer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: u64,
    pub world_size: usize,
    pub global_rank: usize,
    pub current_epoch: usize,
    #[serde(default)]
    pub model_consumed_samples: Option<u64>,
}

impl TrainerState {
    /// State of a fresh single-process run.
    pub fn single_process() -> Self {
        Self {
            world_size: 1,
            ..Self::default()
        }
    }
}

/// Batch-size hyperparameters that determine how many samples one optimizer
/// step consumes on each rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingHyperParams {
    pub train_batchsize: usize,
    pub accumulate_grad_batches: usize,
}

/// Number of training samples consumed before the current step.
///
/// The model's own counter wins when present. Otherwise the count is
/// estimated as `(global_step - 1) * train_batchsize * world_size *
/// accumulate_grad_batches`, with the step clamped so the result is never
/// negative.
pub fn resolve_consumed_samples(state: &TrainerState, hparams: &TrainingHyperParams) -> u64 {
    if let Some(consumed) = state.model_consumed_samples {
        info!("get consumed samples from model: {}", consumed);
        return consumed;
    }

    let consumed = state
        .global_step
        .saturating_sub(1)
        .saturating_mul(hparams.train_batchsize as u64)
        .saturating_mul(state.world_size as u64)
        .saturating_mul(hparams.accumulate_grad_batches as u64);
    info!(
        "calculate consumed samples: {} (global_step={}, world_size={}, train_batchsize={}, accumulate_grad_batches={})",
        consumed,
        state.global_step,
        state.world_size,
        hparams.train_batchsize,
        hparams.accumulate_grad_batches
    );
    consumed
}
