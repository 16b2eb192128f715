pub mod batch;
pub mod dataset;

pub use batch::{Batch, PaddedBatch, collate, pad_batch, reverse_batch_time, reverse_time};
pub use dataset::{DatasetBuilder, Pipeline, PipelineConfig, RecordRange, decode_pool};
