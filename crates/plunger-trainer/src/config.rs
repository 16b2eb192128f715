//! Run configuration. Defaults mirror the production deployment layout.

use std::path::{Path, PathBuf};

use anyhow::bail;
use plunger_core::PipelineConfig;

pub const DEFAULT_HOME: &str = "/AttachedVol/EBSPlungerFiles/";
pub const DEFAULT_INPUT_MODEL: &str =
    "Models/20201216_460k_Param_LSTM_Skip_resBlock_311Epoch.safetensors";
pub const DEFAULT_OUTPUT_MODEL: &str = "Models/20201216_460k_Param_LSTM_Skip_resBlock.safetensors";
pub const DEFAULT_HISTORY: &str = "LossCurves/20201216History.csv";
pub const DEFAULT_RECORDS_DIR: &str = "TFRecordFiles";

/// Everything a training run needs. Relative paths resolve against
/// `home_dir`.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub home_dir: PathBuf,
    pub input_model: PathBuf,
    pub output_model: PathBuf,
    pub history: PathBuf,
    pub records_dir: PathBuf,
    pub validation_split: f64,
    pub batch_size: usize,
    pub num_parallel_calls: usize,
    pub buffer_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Batches timed per pipeline before training; 0 skips the clock.
    pub clock_batches: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from(DEFAULT_HOME),
            input_model: PathBuf::from(DEFAULT_INPUT_MODEL),
            output_model: PathBuf::from(DEFAULT_OUTPUT_MODEL),
            history: PathBuf::from(DEFAULT_HISTORY),
            records_dir: PathBuf::from(DEFAULT_RECORDS_DIR),
            validation_split: 0.1,
            batch_size: 2,
            num_parallel_calls: 8,
            buffer_size: 8,
            epochs: 1000,
            learning_rate: 1e-3,
            clock_batches: 20,
        }
    }
}

impl TrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = home.into();
        self
    }

    pub fn with_input_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_model = path.into();
        self
    }

    pub fn with_output_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_model = path.into();
        self
    }

    pub fn with_history(mut self, path: impl Into<PathBuf>) -> Self {
        self.history = path.into();
        self
    }

    pub fn with_records_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.records_dir = path.into();
        self
    }

    pub fn with_validation_split(mut self, split: f64) -> Self {
        self.validation_split = split;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_parallelism(mut self, num_parallel_calls: usize, buffer_size: usize) -> Self {
        self.num_parallel_calls = num_parallel_calls;
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_clock_batches(mut self, n: usize) -> Self {
        self.clock_batches = n;
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home_dir.join(path)
        }
    }

    pub fn input_model_path(&self) -> PathBuf {
        self.resolve(&self.input_model)
    }

    pub fn output_model_path(&self) -> PathBuf {
        self.resolve(&self.output_model)
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolve(&self.history)
    }

    pub fn records_path(&self) -> PathBuf {
        self.resolve(&self.records_dir)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_batch_size(self.batch_size)
            .with_parallel_calls(self.num_parallel_calls)
            .with_buffer_size(self.buffer_size)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            bail!(
                "validation_split must be in (0, 1), got {}",
                self.validation_split
            );
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        self.pipeline().validate()?;
        Ok(())
    }
}
