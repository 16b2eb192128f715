//! # Training Loop
//!
//! Compiles a loaded model with a loss, metrics, and an Adam optimizer, then
//! fits it for a fixed number of epochs. Each epoch consumes a fixed number of
//! batches from the repeating training pipeline and evaluates the whole
//! validation pipeline once.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use plunger_core::{
    Batch, DataSplit, DatasetBuilder, JsonWellDecoder, RecordDecoder, count_data_items,
    latest_file,
};
use tracing::info;

use crate::callbacks::{
    Callback, Control, EpochLogger, EpochLogs, ModelCheckpoint, TerminateOnNan,
    create_history_if_missing,
};
use crate::checkpoint::load_checkpoint;
use crate::config::TrainConfig;
use crate::model::{ActivationRegistry, PlungerModel};
use crate::objective::Objective;

/// Epsilon of the reference Adam implementation.
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    pub epochs: usize,
    pub steps_per_epoch: usize,
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone)]
pub struct FitSummary {
    /// Epochs whose logs and checkpoint were written.
    pub epochs_completed: usize,
    pub stopped_early: bool,
    pub last_logs: Option<EpochLogs>,
}

/// Sample-weighted means of a fixed set of scalars.
#[derive(Debug, Clone)]
struct RunningMean {
    sums: Vec<f64>,
    weight: f64,
}

impl RunningMean {
    fn new(width: usize) -> Self {
        Self {
            sums: vec![0.0; width],
            weight: 0.0,
        }
    }

    fn add(&mut self, values: &[f64], weight: usize) {
        let w = weight as f64;
        for (sum, v) in self.sums.iter_mut().zip(values) {
            *sum += v * w;
        }
        self.weight += w;
    }

    fn means(&self) -> Vec<f64> {
        if self.weight == 0.0 {
            return vec![f64::NAN; self.sums.len()];
        }
        self.sums.iter().map(|s| s / self.weight).collect()
    }
}

pub struct Trainer {
    model: PlungerModel,
    objective: Objective,
    optimizer: AdamW,
    callbacks: Vec<Box<dyn Callback>>,
}

impl Trainer {
    /// Attach the objective and a fresh Adam optimizer to `model`.
    pub fn compile(
        model: PlungerModel,
        objective: Objective,
        learning_rate: f64,
    ) -> anyhow::Result<Self> {
        let params = ParamsAdamW {
            lr: learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: ADAM_EPSILON,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(model.varmap().all_vars(), params)?;

        Ok(Self {
            model,
            objective,
            optimizer,
            callbacks: Vec::new(),
        })
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn model(&self) -> &PlungerModel {
        &self.model
    }

    pub fn into_model(self) -> PlungerModel {
        self.model
    }

    /// One optimizer step. Returns loss and metrics measured before the update.
    pub fn train_step(&mut self, batch: &Batch) -> anyhow::Result<Vec<f64>> {
        let predictions = self.model.forward(&batch.features)?;
        let loss = (self.objective.loss)(&predictions, &batch.targets)?;
        let mut values = vec![loss.to_scalar::<f32>()? as f64];
        values.extend(
            self.objective
                .metric_scalars(&predictions.detach(), &batch.targets)?,
        );
        self.optimizer.backward_step(&loss)?;
        Ok(values)
    }

    /// Mean loss and metrics over every batch of `batches`.
    pub fn evaluate<I>(&self, batches: I) -> anyhow::Result<Vec<f64>>
    where
        I: IntoIterator<Item = plunger_core::Result<Batch>>,
    {
        let mut mean = RunningMean::new(1 + self.objective.metrics.len());
        for batch in batches {
            let batch = batch?;
            let predictions = self.model.forward(&batch.features)?.detach();
            let values = self.objective.scalars(&predictions, &batch.targets)?;
            mean.add(&values, batch.size());
        }
        Ok(mean.means())
    }

    /// Run `options.epochs` epochs. `validation` is called once per epoch for a
    /// fresh pass over the validation data.
    ///
    /// A callback stop request ends the run immediately; the interrupted epoch
    /// is neither logged nor checkpointed.
    pub fn fit<T, V, F>(
        &mut self,
        train: &mut T,
        mut validation: F,
        options: FitOptions,
    ) -> anyhow::Result<FitSummary>
    where
        T: Iterator<Item = plunger_core::Result<Batch>>,
        F: FnMut() -> plunger_core::Result<V>,
        V: IntoIterator<Item = plunger_core::Result<Batch>>,
    {
        let names = self.objective.log_names();
        for cb in &mut self.callbacks {
            cb.on_train_begin(&names)?;
        }

        let mut last_logs = None;
        for epoch in 0..options.epochs {
            let started = Instant::now();
            let mut mean = RunningMean::new(1 + self.objective.metrics.len());

            for step in 0..options.steps_per_epoch {
                let batch = train
                    .next()
                    .context("training pipeline ended before the epoch was complete")??;
                let values = self.train_step(&batch)?;
                mean.add(&values, batch.size());

                let mut stop = false;
                for cb in &mut self.callbacks {
                    stop |= cb.on_batch_end(epoch, step, values[0]) == Control::Stop;
                }
                if stop {
                    return Ok(FitSummary {
                        epochs_completed: epoch,
                        stopped_early: true,
                        last_logs,
                    });
                }
            }

            let mut values = mean.means();
            values.extend(self.evaluate(validation()?)?);
            let logs = EpochLogs::new(&names, &values);

            let line: Vec<String> = logs
                .names()
                .zip(logs.values())
                .map(|(name, value)| format!("{name}: {value:.4}"))
                .collect();
            info!(
                "Epoch {}/{} - {:.1}s - {}",
                epoch + 1,
                options.epochs,
                started.elapsed().as_secs_f64(),
                line.join(" - ")
            );

            for cb in &mut self.callbacks {
                cb.on_epoch_end(epoch, &logs, &self.model)?;
            }
            last_logs = Some(logs);
        }

        Ok(FitSummary {
            epochs_completed: options.epochs,
            stopped_early: false,
            last_logs,
        })
    }
}

/// Pull up to `n` batches and log the throughput. Returns batches per second.
pub fn clock_pipeline<I>(name: &str, batches: I, n: usize) -> anyhow::Result<f64>
where
    I: IntoIterator<Item = plunger_core::Result<Batch>>,
{
    let started = Instant::now();
    let mut seen = 0usize;
    for batch in batches.into_iter().take(n) {
        batch?;
        seen += 1;
    }
    let secs = started.elapsed().as_secs_f64();
    let rate = if secs > 0.0 { seen as f64 / secs } else { 0.0 };
    info!("Clocked {name} pipeline: {seen} batches in {secs:.2}s ({rate:.2} batches/s)");
    Ok(rate)
}

/// Full run with the JSON record decoder and the default activation registry.
pub fn run_training(config: &TrainConfig) -> anyhow::Result<FitSummary> {
    run_training_with(
        config,
        Arc::new(JsonWellDecoder),
        &ActivationRegistry::default(),
    )
}

pub fn run_training_with(
    config: &TrainConfig,
    decoder: Arc<dyn RecordDecoder>,
    registry: &ActivationRegistry,
) -> anyhow::Result<FitSummary> {
    config.validate()?;
    let device = Device::Cpu;
    let objective = Objective::plunger();

    let history = config.history_path();
    create_history_if_missing(&history, &objective.log_names())?;

    let model_path = config.input_model_path();
    let model = load_checkpoint(&model_path, registry, &device)
        .with_context(|| format!("failed to load model {}", model_path.display()))?;
    info!("Model summary:\n{}", model.summary());

    let records_dir = config.records_path();
    let latest = latest_file(&records_dir)
        .with_context(|| format!("no record file in {}", records_dir.display()))?;
    info!("Most recent record file: {}", latest.display());

    let split = split_for(&latest, config.validation_split)?;
    info!(
        "Number of training wells: {}, Validation wells: {} of total wells {}",
        split.num_train, split.num_valid, split.num_examples
    );

    let builder = DatasetBuilder::new(&latest, split, config.pipeline(), decoder, device)?;
    if config.clock_batches > 0 {
        clock_pipeline("training", builder.train()?, config.clock_batches)?;
        clock_pipeline("validation", builder.validation()?, config.clock_batches)?;
    }

    let options = FitOptions {
        epochs: config.epochs,
        steps_per_epoch: split.steps_per_epoch(config.batch_size)?,
    };
    let mut trainer = Trainer::compile(model, objective, config.learning_rate)?
        .with_callback(EpochLogger::new(history))
        .with_callback(ModelCheckpoint::new(config.output_model_path()))
        .with_callback(TerminateOnNan);

    let mut train = builder.train()?;
    let summary = trainer.fit(&mut train, || builder.validation(), options)?;
    info!(
        epochs = summary.epochs_completed,
        stopped_early = summary.stopped_early,
        "training finished"
    );
    Ok(summary)
}

fn split_for(file: &Path, validation_split: f64) -> anyhow::Result<DataSplit> {
    let num_examples = count_data_items(&[file])?;
    Ok(DataSplit::new(num_examples, validation_split)?)
}
