//! # Plunger Trainer
//!
//! Fits the plunger lift LSTM on the newest record file. Loads a checkpoint,
//! builds the training and validation pipelines, trains with a custom loss
//! and metrics, and after every epoch appends a history row and overwrites
//! the output checkpoint.

pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod model;
pub mod objective;
pub mod trainer;

pub use callbacks::{Callback, Control, EpochLogger, EpochLogs, ModelCheckpoint, TerminateOnNan};
pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use config::TrainConfig;
pub use model::{Activation, ActivationRegistry, ActivationSpec, ModelConfig, PlungerModel};
pub use objective::Objective;
pub use trainer::{FitOptions, FitSummary, Trainer, run_training, run_training_with};

/// Install the `fmt` subscriber used by the binaries (`RUST_LOG`, default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
