//! Padded batching with leading zeros.
//!
//! Sequences are reversed in time, right-padded to the longest member of the
//! batch, then reversed back. The padding therefore sits at the start of
//! each shorter sequence while its data keeps chronological order.

use candle_core::{Device, Tensor};

use crate::error::{PlungerError, Result};
use crate::example::{FEATURE_CHANNELS, SequencePair, TARGET_CHANNELS};

/// Tensors ready for a training or evaluation step.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, T_max, 79]`
    pub features: Tensor,
    /// `[batch, T_max, 2]`
    pub targets: Tensor,
    /// Unpadded length of each member.
    pub lengths: Vec<usize>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.lengths.len()
    }
}

/// Host-side padded batch, row-major `[batch, max_len, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedBatch {
    pub features: Vec<f32>,
    pub targets: Vec<f32>,
    pub lengths: Vec<usize>,
    pub max_len: usize,
}

impl PaddedBatch {
    pub fn size(&self) -> usize {
        self.lengths.len()
    }

    /// Move the batch onto `device`.
    pub fn to_batch(self, device: &Device) -> Result<Batch> {
        let b = self.size();
        let features = Tensor::from_vec(self.features, (b, self.max_len, FEATURE_CHANNELS), device)?;
        let targets = Tensor::from_vec(self.targets, (b, self.max_len, TARGET_CHANNELS), device)?;
        Ok(Batch {
            features,
            targets,
            lengths: self.lengths,
        })
    }
}

/// Reverse the row order of a row-major `[len, channels]` buffer in place.
pub fn reverse_rows(data: &mut [f32], channels: usize) {
    let len = data.len() / channels;
    for i in 0..len / 2 {
        let j = len - 1 - i;
        let (head, tail) = data.split_at_mut(j * channels);
        head[i * channels..(i + 1) * channels].swap_with_slice(&mut tail[..channels]);
    }
}

/// Flip the time axis of one example.
pub fn reverse_time(pair: &mut SequencePair) {
    reverse_rows(&mut pair.features, FEATURE_CHANNELS);
    reverse_rows(&mut pair.targets, TARGET_CHANNELS);
}

/// Right-pad every member with zeros up to the longest sequence.
pub fn pad_batch(pairs: &[SequencePair]) -> Result<PaddedBatch> {
    let max_len = pairs.iter().map(|p| p.len).max().ok_or_else(|| {
        PlungerError::Shape("cannot pad an empty batch".into())
    })?;

    let mut features = vec![0.0f32; pairs.len() * max_len * FEATURE_CHANNELS];
    let mut targets = vec![0.0f32; pairs.len() * max_len * TARGET_CHANNELS];
    for (i, pair) in pairs.iter().enumerate() {
        if pair.features.len() != pair.len * FEATURE_CHANNELS
            || pair.targets.len() != pair.len * TARGET_CHANNELS
        {
            return Err(PlungerError::Shape(format!(
                "batch member {i} does not match its length {}",
                pair.len
            )));
        }
        let f0 = i * max_len * FEATURE_CHANNELS;
        features[f0..f0 + pair.features.len()].copy_from_slice(&pair.features);
        let t0 = i * max_len * TARGET_CHANNELS;
        targets[t0..t0 + pair.targets.len()].copy_from_slice(&pair.targets);
    }

    Ok(PaddedBatch {
        features,
        targets,
        lengths: pairs.iter().map(|p| p.len).collect(),
        max_len,
    })
}

/// Flip the time axis of every member of a padded batch.
pub fn reverse_batch_time(batch: &mut PaddedBatch) {
    let max_len = batch.max_len;
    for chunk in batch.features.chunks_mut(max_len * FEATURE_CHANNELS) {
        reverse_rows(chunk, FEATURE_CHANNELS);
    }
    for chunk in batch.targets.chunks_mut(max_len * TARGET_CHANNELS) {
        reverse_rows(chunk, TARGET_CHANNELS);
    }
}

/// Reverse, pad, and reverse again so that padding leads.
pub fn collate(mut pairs: Vec<SequencePair>) -> Result<PaddedBatch> {
    pairs.iter_mut().for_each(reverse_time);
    let mut batch = pad_batch(&pairs)?;
    reverse_batch_time(&mut batch);
    Ok(batch)
}
