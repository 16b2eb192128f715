//! Loss and metrics for plunger lift predictions.
//!
//! Channel 0 of the targets is MCF flow, channel 1 is plunger speed.

use candle_core::{Result, Tensor};

/// `(predictions, targets) -> scalar`
pub type MetricFn = fn(&Tensor, &Tensor) -> Result<Tensor>;

/// Mean squared error over every batch, time, and channel position.
pub fn custom_loss(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    (predictions - targets)?.sqr()?.mean_all()
}

fn channel_mae(predictions: &Tensor, targets: &Tensor, channel: usize) -> Result<Tensor> {
    let p = predictions.narrow(2, channel, 1)?;
    let t = targets.narrow(2, channel, 1)?;
    (p - t)?.abs()?.mean_all()
}

/// Mean absolute error of the MCF flow channel.
pub fn mcf_metric(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    channel_mae(predictions, targets, 0)
}

/// Mean absolute error of the plunger speed channel.
pub fn plunger_speed_metric(predictions: &Tensor, targets: &Tensor) -> Result<Tensor> {
    channel_mae(predictions, targets, 1)
}

/// A loss plus named metrics, reported in this order.
#[derive(Clone)]
pub struct Objective {
    pub loss: MetricFn,
    pub metrics: Vec<(String, MetricFn)>,
}

impl Objective {
    /// Loss with the MCF and plunger speed metrics.
    pub fn plunger() -> Self {
        Self {
            loss: custom_loss,
            metrics: vec![
                ("MCF_metric".into(), mcf_metric as MetricFn),
                ("plunger_speed_metric".into(), plunger_speed_metric as MetricFn),
            ],
        }
    }

    /// Training names followed by their `val_` counterparts.
    pub fn log_names(&self) -> Vec<String> {
        let train: Vec<String> = std::iter::once("loss".to_string())
            .chain(self.metrics.iter().map(|(name, _)| name.clone()))
            .collect();
        let valid = train.iter().map(|name| format!("val_{name}"));
        train.clone().into_iter().chain(valid).collect()
    }

    /// Evaluate loss (first) and every metric as host scalars.
    pub fn scalars(&self, predictions: &Tensor, targets: &Tensor) -> Result<Vec<f64>> {
        let loss = (self.loss)(predictions, targets)?;
        let mut out = vec![loss.to_scalar::<f32>()? as f64];
        out.extend(self.metric_scalars(predictions, targets)?);
        Ok(out)
    }

    /// Evaluate only the metrics.
    pub fn metric_scalars(&self, predictions: &Tensor, targets: &Tensor) -> Result<Vec<f64>> {
        self.metrics
            .iter()
            .map(|(_, metric)| -> Result<f64> {
                Ok(metric(predictions, targets)?.to_scalar::<f32>()? as f64)
            })
            .collect()
    }
}

impl Default for Objective {
    fn default() -> Self {
        Self::plunger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn pair() -> (Tensor, Tensor) {
        // One well, two steps, two channels.
        let p = Tensor::new(&[[[1.0f32, 2.0], [3.0, 4.0]]], &Device::Cpu).unwrap();
        let t = Tensor::new(&[[[0.0f32, 2.0], [1.0, 8.0]]], &Device::Cpu).unwrap();
        (p, t)
    }

    #[test]
    fn history_columns() {
        assert_eq!(
            Objective::plunger().log_names(),
            vec![
                "loss",
                "MCF_metric",
                "plunger_speed_metric",
                "val_loss",
                "val_MCF_metric",
                "val_plunger_speed_metric",
            ]
        );
    }

    #[test]
    fn values_per_channel() {
        let (p, t) = pair();
        let values = Objective::plunger().scalars(&p, &t).unwrap();
        // squared errors: 1, 0, 4, 16
        assert_eq!(values[0], 5.25);
        // |1-0|, |3-1|
        assert_eq!(values[1], 1.5);
        // |2-2|, |4-8|
        assert_eq!(values[2], 2.0);
    }
}
