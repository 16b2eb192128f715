//! # Plunger Core
//!
//! Data plumbing for plunger lift models: record file discovery, record
//! framing, well example decoding, train/validation splits, and prefetching
//! pipelines that yield leading-zero padded batches.
//!
//! ## Quick Start
//!
//! ```rust
//! use plunger_core::{DataSplit, count_data_items};
//!
//! let n = count_data_items(&["wells-1000-Records.tfrecord"]).unwrap();
//! let split = DataSplit::new(n, 0.1).unwrap();
//!
//! assert_eq!((split.num_train, split.num_valid), (900, 100));
//! assert_eq!(split.steps_per_epoch(2).unwrap(), 450);
//! ```
pub mod error;
pub mod example;
pub mod files;
pub mod pipeline;
pub mod record;
pub mod split;

// Re-export primary API
pub use error::{PlungerError, Result};
pub use example::{
    FEATURE_CHANNELS, JsonWellDecoder, RecordDecoder, SequencePair, TARGET_CHANNELS,
    WellExample, WellRecord,
};
pub use files::{RecordCounter, count_data_items, latest_file};
pub use pipeline::{Batch, DatasetBuilder, Pipeline, PipelineConfig, RecordRange, decode_pool};
pub use record::{RecordReader, RecordWriter};
pub use split::{DataSplit, steps_per_epoch};
