//! # Plunger LSTM Network
//!
//! Residual LSTM stack mapping `[batch, T, 79]` sensor sequences to
//! `[batch, T, 2]` predictions (MCF flow, plunger speed). The activation is
//! resolved by name through an [`ActivationRegistry`], so a checkpoint only
//! stores the activation's name and parameters.

use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{Context, bail};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::rnn::{LSTM, LSTMConfig, RNN, lstm};
use candle_nn::{Linear, VarBuilder, VarMap, linear};
use plunger_core::{FEATURE_CHANNELS, TARGET_CHANNELS};
use serde::{Deserialize, Serialize};

/// Slope used by `LeakyReLU` when a checkpoint does not specify one.
pub const DEFAULT_NEGATIVE_SLOPE: f64 = 0.3;

/// Serialised reference to an activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_slope: Option<f64>,
}

impl ActivationSpec {
    pub fn leaky_relu(negative_slope: f64) -> Self {
        Self {
            name: "LeakyReLU".into(),
            negative_slope: Some(negative_slope),
        }
    }
}

/// Element-wise activation applied between layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    LeakyRelu { negative_slope: f64 },
    Relu,
    Tanh,
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            // max(x, a*x) equals leaky relu for 0 <= a <= 1
            Activation::LeakyRelu { negative_slope } => xs.maximum(&(xs * *negative_slope)?),
            Activation::Relu => xs.relu(),
            Activation::Tanh => xs.tanh(),
        }
    }
}

type ActivationCtor = fn(&ActivationSpec) -> anyhow::Result<Activation>;

/// Maps serialised activation names to implementations.
#[derive(Clone)]
pub struct ActivationRegistry {
    constructors: HashMap<String, ActivationCtor>,
}

fn leaky_relu_ctor(spec: &ActivationSpec) -> anyhow::Result<Activation> {
    let negative_slope = spec.negative_slope.unwrap_or(DEFAULT_NEGATIVE_SLOPE);
    if !(0.0..=1.0).contains(&negative_slope) {
        bail!("LeakyReLU negative_slope must be in [0, 1], got {negative_slope}");
    }
    Ok(Activation::LeakyRelu { negative_slope })
}

impl ActivationRegistry {
    /// An empty registry. Every name must be registered before use.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) the implementation behind `name`.
    pub fn register(&mut self, name: impl Into<String>, ctor: ActivationCtor) -> &mut Self {
        self.constructors.insert(name.into(), ctor);
        self
    }

    pub fn resolve(&self, spec: &ActivationSpec) -> anyhow::Result<Activation> {
        let ctor = self
            .constructors
            .get(&spec.name)
            .with_context(|| format!("unknown activation {:?}", spec.name))?;
        ctor(spec)
    }
}

impl Default for ActivationRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("LeakyReLU", leaky_relu_ctor)
            .register("ReLU", |_| Ok(Activation::Relu))
            .register("Tanh", |_| Ok(Activation::Tanh));
        registry
    }
}

/// Architecture hyperparameters. Stored alongside the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    pub hidden_dim: usize,
    pub num_blocks: usize,
    pub activation: ActivationSpec,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_dim: FEATURE_CHANNELS,
            output_dim: TARGET_CHANNELS,
            hidden_dim: 128,
            num_blocks: 3,
            activation: ActivationSpec::leaky_relu(DEFAULT_NEGATIVE_SLOPE),
        }
    }
}

impl ModelConfig {
    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_num_blocks(mut self, num_blocks: usize) -> Self {
        self.num_blocks = num_blocks;
        self
    }

    pub fn with_activation(mut self, activation: ActivationSpec) -> Self {
        self.activation = activation;
        self
    }
}

/// Input projection, residual LSTM blocks, linear head.
pub struct PlungerNet {
    input: Linear,
    blocks: Vec<LSTM>,
    head: Linear,
    activation: Activation,
}

impl PlungerNet {
    pub fn new(
        config: &ModelConfig,
        activation: Activation,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let input = linear(config.input_dim, config.hidden_dim, vb.pp("input"))?;
        let blocks = (0..config.num_blocks)
            .map(|i| {
                lstm(
                    config.hidden_dim,
                    config.hidden_dim,
                    LSTMConfig::default(),
                    vb.pp(format!("block{i}")),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let head = linear(config.hidden_dim, config.output_dim, vb.pp("head"))?;

        Ok(Self {
            input,
            blocks,
            head,
            activation,
        })
    }
}

impl Module for PlungerNet {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut hidden = self.activation.apply(&self.input.forward(xs)?)?;
        for block in &self.blocks {
            let states = block.seq(&hidden)?;
            let out = block.states_to_tensor(&states)?;
            hidden = self.activation.apply(&(&hidden + &out)?)?;
        }
        self.head.forward(&hidden)
    }
}

/// A network together with its trainable variables and architecture.
pub struct PlungerModel {
    pub(crate) net: PlungerNet,
    pub(crate) varmap: VarMap,
    config: ModelConfig,
    device: Device,
}

impl PlungerModel {
    /// Build a freshly initialised model.
    pub fn build(
        config: ModelConfig,
        registry: &ActivationRegistry,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let activation = registry.resolve(&config.activation)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = PlungerNet::new(&config, activation, vb)?;

        Ok(Self {
            net,
            varmap,
            config,
            device: device.clone(),
        })
    }

    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.net.forward(xs)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    /// Human-readable listing of variables and their shapes.
    pub fn summary(&self) -> String {
        let mut named: Vec<(String, Vec<usize>)> = match self.varmap.data().lock() {
            Ok(data) => data
                .iter()
                .map(|(name, var)| (name.clone(), var.as_tensor().dims().to_vec()))
                .collect(),
            Err(_) => Vec::new(),
        };
        named.sort();

        let mut out = String::new();
        for (name, dims) in &named {
            let _ = writeln!(out, "{name:<24} {dims:?}");
        }
        let _ = write!(
            out,
            "Total params: {} ({} blocks, hidden {}, activation {})",
            self.num_parameters(),
            self.config.num_blocks,
            self.config.hidden_dim,
            self.config.activation.name
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig::default().with_hidden_dim(8).with_num_blocks(2)
    }

    #[test]
    fn forward_keeps_time_axis() {
        let model =
            PlungerModel::build(small_config(), &ActivationRegistry::default(), &Device::Cpu)
                .unwrap();
        let xs = Tensor::zeros((2, 5, FEATURE_CHANNELS), DType::F32, &Device::Cpu).unwrap();
        let ys = model.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[2, 5, TARGET_CHANNELS]);
    }

    #[test]
    fn parameter_count_matches_layers() {
        let model =
            PlungerModel::build(small_config(), &ActivationRegistry::default(), &Device::Cpu)
                .unwrap();
        let input = FEATURE_CHANNELS * 8 + 8;
        let block = 4 * 8 * 8 * 2 + 4 * 8 * 2;
        let head = 8 * TARGET_CHANNELS + TARGET_CHANNELS;
        assert_eq!(model.num_parameters(), input + 2 * block + head);
        assert!(model.summary().contains("Total params"));
    }

    #[test]
    fn leaky_relu_scales_negatives() {
        let act = Activation::LeakyRelu {
            negative_slope: 0.5,
        };
        let xs = Tensor::new(&[-2.0f32, 0.0, 3.0], &Device::Cpu).unwrap();
        let ys: Vec<f32> = act.apply(&xs).unwrap().to_vec1().unwrap();
        assert_eq!(ys, vec![-1.0, 0.0, 3.0]);
    }

    #[test]
    fn unknown_activation_rejected() {
        let config = small_config().with_activation(ActivationSpec {
            name: "Swish".into(),
            negative_slope: None,
        });
        let err = PlungerModel::build(config, &ActivationRegistry::default(), &Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("Swish"));
    }

    #[test]
    fn registry_substitution_overrides_name() {
        let mut registry = ActivationRegistry::default();
        registry.register("LeakyReLU", |_| Ok(Activation::Tanh));
        let act = registry
            .resolve(&ActivationSpec::leaky_relu(0.1))
            .unwrap();
        assert_eq!(act, Activation::Tanh);
    }
}
