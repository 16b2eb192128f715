//! # Model Checkpoints
//!
//! A checkpoint is one safetensors file: the tensors are the model weights and
//! the header metadata carries the JSON [`ModelConfig`] under `architecture`.
//! Optimizer state is never stored. Writes land in a sibling `.tmp` file that
//! is renamed over the target.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use tracing::debug;

use crate::model::{ActivationRegistry, ModelConfig, PlungerModel};

pub const FORMAT_KEY: &str = "format";
pub const FORMAT_VERSION: &str = "plunger-net/1";
pub const ARCHITECTURE_KEY: &str = "architecture";

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialise architecture and weights to `path`, replacing any previous file.
pub fn save_checkpoint(model: &PlungerModel, path: &Path) -> anyhow::Result<()> {
    let mut tensors: Vec<(String, Tensor)> = {
        let data = model
            .varmap()
            .data()
            .lock()
            .map_err(|_| anyhow!("model variables are poisoned"))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };
    tensors.sort_by(|a, b| a.0.cmp(&b.0));

    let metadata = HashMap::from([
        (FORMAT_KEY.to_string(), FORMAT_VERSION.to_string()),
        (
            ARCHITECTURE_KEY.to_string(),
            serde_json::to_string(model.config())?,
        ),
    ]);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    safetensors::serialize_to_file(
        tensors.iter().map(|(name, t)| (name.as_str(), t)),
        &Some(metadata),
        &tmp,
    )
    .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move checkpoint into {}", path.display()))?;

    debug!(path = %path.display(), tensors = tensors.len(), "checkpoint written");
    Ok(())
}

/// Read the architecture stored in a checkpoint header.
pub fn read_architecture(path: &Path) -> anyhow::Result<ModelConfig> {
    let buffer =
        fs::read(path).with_context(|| format!("failed to read checkpoint {}", path.display()))?;
    let (_, metadata) = SafeTensors::read_metadata(&buffer)
        .with_context(|| format!("invalid checkpoint header in {}", path.display()))?;
    let info = metadata
        .metadata()
        .as_ref()
        .context("checkpoint has no metadata")?;

    match info.get(FORMAT_KEY).map(String::as_str) {
        Some(FORMAT_VERSION) => {}
        Some(other) => bail!("unsupported checkpoint format {other:?}"),
        None => bail!("checkpoint has no format marker"),
    }
    let architecture = info
        .get(ARCHITECTURE_KEY)
        .context("checkpoint has no architecture")?;
    Ok(serde_json::from_str(architecture)?)
}

/// Restore a model without any training state. Activation names are resolved
/// through `registry`.
pub fn load_checkpoint(
    path: &Path,
    registry: &ActivationRegistry,
    device: &Device,
) -> anyhow::Result<PlungerModel> {
    let config = read_architecture(path)?;
    let mut model = PlungerModel::build(config, registry, device)?;
    model
        .varmap
        .load(path)
        .with_context(|| format!("failed to load weights from {}", path.display()))?;
    Ok(model)
}
