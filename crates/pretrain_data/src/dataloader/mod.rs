//! src/dataloader/mod.rs
//!
//! This module implements the `DataLoader`.
//!
//! The `DataLoader` coordinates the `Dataset`, the batch `Sampler`, and the
//! `Collator` to load and batch data for training, with optional parallel
//! loading.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌─────────┐
//!                    │ Dataset │ (random access by index)
//!                    └────┬────┘
//!                         │
//!                         ↓
//!                 ┌───────────────┐
//!                 │ Batch Sampler │ (which indices form each batch, per epoch)
//!                 └───────┬───────┘
//!                         │
//!                         ↓
//!                  ┌──────────────┐
//!                  │  DataLoader  │ ←───── Config (batch_size, workers, etc.)
//!                  └──────┬───────┘
//!                         │
//!                         ↓
//!                   [Worker Threads] (optional parallelism)
//!                         │ fetch items & collate
//!                         ↓
//!                   ┌──────────┐
//!                   │ Collator │ (pads and stacks into a batch)
//!                   └────┬─────┘
//!                        ↓
//!                   ┌───────────┐
//!                   │ MiniBatch │
//!                   └───────────┘
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports
//! ├── config.rs          # DataLoaderConfig and builder
//! ├── loader.rs          # DataLoader struct and constructors
//! ├── iterator/
//! │   └── mod.rs         # DataLoaderIter (single-threaded and worker-backed)
//! └── workers/
//!     ├── mod.rs         # Batch tasks, fetch + collate
//!     └── pool.rs        # Generic `WorkerPool<Task, Output>`
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let config = DataLoaderConfig::builder()
//!     .batch_size(32)
//!     .num_workers(4)
//!     .prefetch_factor(2)
//!     .build();
//!
//! let dataloader = DataLoader::new(dataset, config, StackCollator)?;
//!
//! for batch in dataloader.iter()? {
//!     let batch: MiniBatch = batch?;
//!     // Use batch.get("input_ids")?, etc.
//! }
//! ```
//!
//! # Performance Guidelines
//!
//! - `num_workers = 0`: Single-threaded, lowest memory usage but no parallelism
//! - `num_workers > 0`: Multi-threaded; memory is
//!   O(num_workers x prefetch_factor x batch_size)

mod config;
mod iterator;
mod loader;
mod workers;

pub use config::{DataLoaderConfig, DataLoaderConfigBuilder};
pub use iterator::DataLoaderIter;
pub use loader::{BoxedBatchSampler, DataLoader};
