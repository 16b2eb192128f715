//! # Well Examples
//!
//! One well's time series plus the decoder contract that turns a raw record
//! payload into it.

use serde::{Deserialize, Serialize};

use crate::error::{PlungerError, Result};

/// Sensor channels per time step.
pub const FEATURE_CHANNELS: usize = 79;

/// Target channels per time step: MCF flow and plunger speed.
pub const TARGET_CHANNELS: usize = 2;

/// A well's feature and target sequences, stored row-major as `[T, C]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WellExample {
    /// Unique well identifier. Dropped before batching.
    pub uwi: String,
    pub features: Vec<f32>,
    pub targets: Vec<f32>,
    pub len: usize,
}

impl WellExample {
    /// Build an example from per-step rows, validating channel counts.
    pub fn from_rows(
        uwi: impl Into<String>,
        features: &[Vec<f32>],
        targets: &[Vec<f32>],
    ) -> Result<Self> {
        if features.len() != targets.len() {
            return Err(PlungerError::Shape(format!(
                "features have {} steps but targets have {}",
                features.len(),
                targets.len()
            )));
        }
        if features.is_empty() {
            return Err(PlungerError::Shape("sequence has no time steps".into()));
        }

        Ok(Self {
            uwi: uwi.into(),
            features: flatten_rows(features, FEATURE_CHANNELS, "feature")?,
            targets: flatten_rows(targets, TARGET_CHANNELS, "target")?,
            len: features.len(),
        })
    }

    /// Drop the identifier, keeping `(features, targets)`.
    pub fn into_sequences(self) -> SequencePair {
        SequencePair {
            features: self.features,
            targets: self.targets,
            len: self.len,
        }
    }
}

/// Feature/target sequences without the well identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePair {
    pub features: Vec<f32>,
    pub targets: Vec<f32>,
    pub len: usize,
}

fn flatten_rows(rows: &[Vec<f32>], channels: usize, what: &str) -> Result<Vec<f32>> {
    let mut flat = Vec::with_capacity(rows.len() * channels);
    for (t, row) in rows.iter().enumerate() {
        if row.len() != channels {
            return Err(PlungerError::Shape(format!(
                "{what} row {t} has {} channels, expected {channels}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(flat)
}

/// Decodes one raw record payload into a [`WellExample`].
///
/// Implementations must be shareable across the parse worker pool.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<WellExample>;
}

/// JSON payload layout used by [`JsonWellDecoder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellRecord {
    pub uwi: String,
    pub features: Vec<Vec<f32>>,
    pub targets: Vec<Vec<f32>>,
}

impl WellRecord {
    pub fn to_example(&self) -> Result<WellExample> {
        WellExample::from_rows(self.uwi.clone(), &self.features, &self.targets)
    }
}

/// Decoder for JSON-encoded [`WellRecord`] payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWellDecoder;

impl RecordDecoder for JsonWellDecoder {
    fn decode(&self, payload: &[u8]) -> Result<WellExample> {
        let record: WellRecord =
            serde_json::from_slice(payload).map_err(|e| PlungerError::Decode(e.to_string()))?;
        record.to_example()
    }
}
