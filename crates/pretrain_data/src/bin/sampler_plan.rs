//! Prints the index batches one data-parallel rank would train on.
//!
//! Handy for checking a resume point before relaunching a job:
//!
//! ```bash
//! sampler-plan --total-samples 1000 --micro-batch-size 4 --world-size 8 \
//!     --rank 3 --global-step 120 --epoch 2 --sampler-type random --limit 5
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pretrain_data::{
    resolve_consumed_samples, PretrainingRandomSampler, PretrainingSampler, PropMixingRandomSampler, Sampler,
    SamplerType, TrainerState, TrainingHyperParams,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "sampler-plan")]
#[command(about = "Show the micro-batches a rank receives from a resumable pretraining sampler", long_about = None)]
struct Cli {
    /// Samples in the training split. Ignored when --source-sizes is given
    #[arg(long, default_value_t = 0)]
    total_samples: usize,

    /// Per-source sizes for mixing_balance, comma separated
    #[arg(long, value_delimiter = ',')]
    source_sizes: Vec<usize>,

    #[arg(long, default_value_t = 32)]
    micro_batch_size: usize,

    #[arg(long, default_value_t = 1)]
    world_size: usize,

    #[arg(long, default_value_t = 0)]
    rank: usize,

    #[arg(long, default_value_t = 0)]
    epoch: usize,

    /// Optimizer steps already taken; used to estimate consumed samples
    #[arg(long, default_value_t = 0)]
    global_step: u64,

    /// Exact consumed-sample counter; overrides the estimate from --global-step
    #[arg(long)]
    consumed_samples: Option<u64>,

    #[arg(long, default_value_t = 1)]
    accumulate_grad_batches: usize,

    #[arg(long, default_value_t = SamplerType::Random)]
    sampler_type: SamplerType,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Print at most this many batches
    #[arg(long)]
    limit: Option<usize>,

    /// Emit one JSON document instead of one line per batch
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Plan {
    sampler_type: String,
    epoch: usize,
    rank: usize,
    consumed_samples: u64,
    expected_batches: Option<usize>,
    batches: Vec<Vec<usize>>,
}

fn build_sampler(cli: &Cli, consumed: usize) -> Result<Box<dyn Sampler<Item = Vec<usize>>>> {
    let total = if cli.source_sizes.is_empty() {
        cli.total_samples
    } else {
        cli.source_sizes.iter().sum()
    };

    let sampler: Box<dyn Sampler<Item = Vec<usize>>> = match cli.sampler_type {
        SamplerType::Single => Box::new(
            PretrainingSampler::new(total, consumed, cli.micro_batch_size, cli.rank, cli.world_size)?
                .with_epoch(cli.epoch),
        ),
        SamplerType::Random | SamplerType::Mixing => Box::new(
            PretrainingRandomSampler::new(total, consumed, cli.micro_batch_size, cli.rank, cli.world_size, cli.epoch)?
                .with_base_seed(cli.seed),
        ),
        SamplerType::MixingBalance => {
            let sizes = if cli.source_sizes.is_empty() {
                vec![cli.total_samples]
            } else {
                cli.source_sizes.clone()
            };
            Box::new(
                PropMixingRandomSampler::new(sizes, consumed, cli.micro_batch_size, cli.rank, cli.world_size, cli.epoch)?
                    .with_base_seed(cli.seed),
            )
        }
    };
    Ok(sampler)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let state = TrainerState {
        global_step: cli.global_step,
        world_size: cli.world_size,
        global_rank: cli.rank,
        current_epoch: cli.epoch,
        model_consumed_samples: cli.consumed_samples,
    };
    let hparams = TrainingHyperParams {
        train_batchsize: cli.micro_batch_size,
        accumulate_grad_batches: cli.accumulate_grad_batches,
    };
    let consumed = resolve_consumed_samples(&state, &hparams);

    let sampler = build_sampler(&cli, usize::try_from(consumed).context("consumed samples overflow usize")?)
        .context("Failed to build sampler")?;
    info!("expected batches for rank {}: {:?}", cli.rank, sampler.expected_len_at(cli.epoch));

    let batches: Vec<Vec<usize>> = sampler.iter(cli.epoch).take(cli.limit.unwrap_or(usize::MAX)).collect();

    if cli.json {
        let plan = Plan {
            sampler_type: cli.sampler_type.to_string(),
            epoch: cli.epoch,
            rank: cli.rank,
            consumed_samples: consumed,
            expected_batches: sampler.expected_len_at(cli.epoch),
            batches,
        };
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        for (step, batch) in batches.iter().enumerate() {
            println!("{}\t{:?}", step, batch);
        }
    }
    Ok(())
}
