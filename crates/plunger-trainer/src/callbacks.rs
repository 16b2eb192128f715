//! # Training Callbacks
//!
//! Observers invoked by the training loop: per-epoch history rows, checkpoint
//! overwrites, and termination on a non-finite loss.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::checkpoint::save_checkpoint;
use crate::model::PlungerModel;

/// Named scalar values for one completed epoch, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochLogs {
    entries: Vec<(String, f64)>,
}

impl EpochLogs {
    pub fn new(names: &[String], values: &[f64]) -> Self {
        Self {
            entries: names.iter().cloned().zip(values.iter().copied()).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(_, v)| *v)
    }
}

/// Whether training should keep going after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

pub trait Callback {
    /// Called once before the first epoch with the log column names.
    fn on_train_begin(&mut self, _names: &[String]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_batch_end(&mut self, _epoch: usize, _step: usize, _loss: f64) -> Control {
        Control::Continue
    }

    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        _logs: &EpochLogs,
        _model: &PlungerModel,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Create `path` holding only the header row, unless it already exists.
/// Returns whether the file was created.
pub fn create_history_if_missing(path: &Path, names: &[String]) -> anyhow::Result<bool> {
    if path.is_file() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    info!(path = %path.display(), "creating new history file");
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create history {}", path.display()))?;
    w.write_record(names)?;
    w.flush()?;
    Ok(true)
}

/// Appends one CSV row per epoch. The file is the only record of history.
pub struct EpochLogger {
    path: PathBuf,
}

impl EpochLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Callback for EpochLogger {
    fn on_train_begin(&mut self, names: &[String]) -> anyhow::Result<()> {
        create_history_if_missing(&self.path, names)?;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _epoch: usize,
        logs: &EpochLogs,
        _model: &PlungerModel,
    ) -> anyhow::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history {}", self.path.display()))?;
        let mut w = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        w.write_record(logs.values().map(|v| v.to_string()))?;
        w.flush()?;
        Ok(())
    }
}

/// Overwrites a single checkpoint after every epoch, regardless of metrics.
pub struct ModelCheckpoint {
    path: PathBuf,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _logs: &EpochLogs,
        model: &PlungerModel,
    ) -> anyhow::Result<()> {
        info!("Epoch {:05}: saving model to {}", epoch + 1, self.path.display());
        save_checkpoint(model, &self.path)
    }
}

/// Stops training as soon as a batch produces a non-finite loss.
#[derive(Debug, Default)]
pub struct TerminateOnNan;

impl Callback for TerminateOnNan {
    fn on_batch_end(&mut self, epoch: usize, step: usize, loss: f64) -> Control {
        if loss.is_finite() {
            Control::Continue
        } else {
            warn!(epoch = epoch + 1, step, loss, "invalid loss, terminating training");
            Control::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivationRegistry, ModelConfig};
    use crate::objective::Objective;
    use candle_core::Device;

    fn model() -> PlungerModel {
        let config = ModelConfig::default().with_hidden_dim(2).with_num_blocks(1);
        PlungerModel::build(config, &ActivationRegistry::default(), &Device::Cpu).unwrap()
    }

    #[test]
    fn history_has_header_plus_one_row_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LossCurves").join("history.csv");
        let names = Objective::plunger().log_names();
        let model = model();

        let mut logger = EpochLogger::new(&path);
        logger.on_train_begin(&names).unwrap();
        for epoch in 0..3 {
            let values = vec![epoch as f64; names.len()];
            logger
                .on_epoch_end(epoch, &EpochLogs::new(&names, &values), &model)
                .unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "loss,MCF_metric,plunger_speed_metric,val_loss,val_MCF_metric,val_plunger_speed_metric"
        );
        assert_eq!(lines[3], "2,2,2,2,2,2");
    }

    #[test]
    fn existing_history_is_appended_not_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let names = Objective::plunger().log_names();
        fs::write(&path, "loss\n0.5\n").unwrap();

        assert!(!create_history_if_missing(&path, &names).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "loss\n0.5\n");
    }

    #[test]
    fn nan_loss_stops() {
        let mut cb = TerminateOnNan;
        assert_eq!(cb.on_batch_end(0, 0, 0.25), Control::Continue);
        assert_eq!(cb.on_batch_end(0, 1, f64::NAN), Control::Stop);
        assert_eq!(cb.on_batch_end(0, 2, f64::INFINITY), Control::Stop);
    }

    #[test]
    fn logs_lookup_by_name() {
        let names = Objective::plunger().log_names();
        let logs = EpochLogs::new(&names, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(logs.get("val_loss"), Some(4.0));
        assert_eq!(logs.names().count(), 6);
        assert_eq!(logs.get("accuracy"), None);
    }
}
