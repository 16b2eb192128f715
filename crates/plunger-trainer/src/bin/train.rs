use std::path::PathBuf;

use clap::Parser;
use plunger_trainer::config::{
    DEFAULT_HISTORY, DEFAULT_HOME, DEFAULT_INPUT_MODEL, DEFAULT_OUTPUT_MODEL, DEFAULT_RECORDS_DIR,
};
use plunger_trainer::{TrainConfig, init_tracing, run_training};

/// Train the plunger lift model on the most recent record file.
#[derive(Parser)]
#[command(name = "train")]
#[command(version)]
struct Cli {
    /// Root directory; relative paths below resolve against it
    #[arg(long, env = "PLUNGER_HOME", default_value = DEFAULT_HOME)]
    home: PathBuf,

    /// Checkpoint to start from
    #[arg(long, env = "PLUNGER_INPUT_MODEL", default_value = DEFAULT_INPUT_MODEL)]
    input_model: PathBuf,

    /// Checkpoint overwritten after every epoch
    #[arg(long, env = "PLUNGER_OUTPUT_MODEL", default_value = DEFAULT_OUTPUT_MODEL)]
    output_model: PathBuf,

    /// Loss history CSV
    #[arg(long, env = "PLUNGER_HISTORY", default_value = DEFAULT_HISTORY)]
    history: PathBuf,

    /// Directory holding record files
    #[arg(long, env = "PLUNGER_RECORDS_DIR", default_value = DEFAULT_RECORDS_DIR)]
    records_dir: PathBuf,

    #[arg(long, default_value_t = 0.1)]
    validation_split: f64,

    #[arg(long, default_value_t = 2)]
    batch_size: usize,

    /// Record decode workers
    #[arg(long, default_value_t = 8)]
    num_parallel_calls: usize,

    /// Batches prefetched ahead of training
    #[arg(long, default_value_t = 8)]
    buffer_size: usize,

    #[arg(long, default_value_t = 1000)]
    epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Batches timed per pipeline before training (0 disables)
    #[arg(long, default_value_t = 20)]
    clock_batches: usize,
}

impl Cli {
    fn into_config(self) -> TrainConfig {
        TrainConfig::new()
            .with_home_dir(self.home)
            .with_input_model(self.input_model)
            .with_output_model(self.output_model)
            .with_history(self.history)
            .with_records_dir(self.records_dir)
            .with_validation_split(self.validation_split)
            .with_batch_size(self.batch_size)
            .with_parallelism(self.num_parallel_calls, self.buffer_size)
            .with_epochs(self.epochs)
            .with_learning_rate(self.learning_rate)
            .with_clock_batches(self.clock_batches)
    }
}

fn main() {
    init_tracing();
    let config = Cli::parse().into_config();

    if let Err(e) = run_training(&config) {
        eprintln!("Training failed: {e:#}");
        std::process::exit(1);
    }
}
