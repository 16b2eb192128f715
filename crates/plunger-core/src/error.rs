use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while locating, reading, and batching well records.
#[derive(Debug, Error)]
pub enum PlungerError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record directory has no entries to choose from.
    #[error("no record files found in {dir:?}")]
    EmptyDirectory {
        /// The directory that was scanned.
        dir: PathBuf,
    },

    /// A record file name does not carry a `-<count>-Records.` marker.
    #[error("file name does not embed a record count: {file:?}")]
    RecordCountMissing {
        /// The offending file.
        file: PathBuf,
    },

    /// A record frame is truncated or fails its checksum.
    #[error("corrupt record at byte {offset}: {reason}")]
    CorruptRecord {
        /// Byte offset of the frame start.
        offset: u64,
        /// What was wrong with the frame.
        reason: String,
    },

    /// A record payload could not be decoded into a well example.
    #[error("failed to decode record: {0}")]
    Decode(String),

    /// Sequence shapes do not line up with the expected channel layout.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A split has zero examples where at least one is required.
    #[error("{split} split is empty")]
    EmptySplit {
        /// Which split ("training" or "validation").
        split: &'static str,
    },

    /// The background producer or one of its decode workers panicked.
    #[error("record pipeline producer panicked: {0}")]
    ProducerPanicked(String),

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for plunger core operations.
pub type Result<T> = std::result::Result<T, PlungerError>;
