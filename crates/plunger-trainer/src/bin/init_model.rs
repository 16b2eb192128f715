//! Writes a freshly initialised checkpoint to start training from scratch.

use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use clap::Parser;
use plunger_trainer::model::DEFAULT_NEGATIVE_SLOPE;
use plunger_trainer::{
    ActivationRegistry, ActivationSpec, ModelConfig, PlungerModel, init_tracing, save_checkpoint,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "init-model")]
#[command(about = "Create an untrained plunger lift checkpoint")]
#[command(version)]
struct Cli {
    /// Output checkpoint path
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value_t = 128)]
    hidden_dim: usize,

    /// Residual LSTM blocks
    #[arg(long, default_value_t = 3)]
    num_blocks: usize,

    /// LeakyReLU negative slope
    #[arg(long, default_value_t = DEFAULT_NEGATIVE_SLOPE)]
    negative_slope: f64,

    /// Overwrite an existing file
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.output.exists() && !cli.force {
        anyhow::bail!("{} exists; pass --force to overwrite", cli.output.display());
    }

    let config = ModelConfig::default()
        .with_hidden_dim(cli.hidden_dim)
        .with_num_blocks(cli.num_blocks)
        .with_activation(ActivationSpec::leaky_relu(cli.negative_slope));
    let model = PlungerModel::build(config, &ActivationRegistry::default(), &Device::Cpu)?;
    save_checkpoint(&model, &cli.output)?;

    info!(
        params = model.num_parameters(),
        path = %cli.output.display(),
        "wrote initial checkpoint"
    );
    Ok(())
}
