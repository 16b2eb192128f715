//! # Record Pipelines
//!
//! Streams padded batches out of a record file on a background producer.
//! Payloads are decoded on a bounded rayon pool and finished batches wait in
//! a bounded channel, so at most `buffer_size` batches are held ahead of the
//! consumer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use candle_core::Device;
use crossbeam_channel::{Receiver, Sender, bounded};
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::error::{PlungerError, Result};
use crate::example::{RecordDecoder, SequencePair};
use crate::pipeline::batch::{Batch, collate};
use crate::record::RecordReader;
use crate::split::DataSplit;

/// Batching and concurrency knobs shared by both pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Worker threads decoding record payloads.
    pub num_parallel_calls: usize,
    /// Batches buffered ahead of the consumer.
    pub buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            num_parallel_calls: 8,
            buffer_size: 8,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallel_calls(mut self, n: usize) -> Self {
        self.num_parallel_calls = n;
        self
    }

    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PlungerError::InvalidConfig("batch_size must be >= 1".into()));
        }
        if self.num_parallel_calls == 0 {
            return Err(PlungerError::InvalidConfig(
                "num_parallel_calls must be >= 1".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(PlungerError::InvalidConfig("buffer_size must be >= 1".into()));
        }
        Ok(())
    }
}

/// Which contiguous slice of the record stream a pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRange {
    pub skip: usize,
    /// `None` reads to the end of the file.
    pub take: Option<usize>,
}

/// Iterator over batches produced by a background thread.
///
/// The first error ends the stream. If the producer dies by panicking, the
/// stream ends with [`PlungerError::ProducerPanicked`] rather than looking
/// exhausted. Dropping the pipeline disconnects the channel and the producer
/// exits on its next send.
pub struct Pipeline {
    rx: Receiver<Result<Batch>>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

/// Thread pool that decodes record payloads.
pub fn decode_pool(num_threads: usize) -> Result<Arc<ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("record-decode-{i}"))
        .build()
        .map_err(|e| PlungerError::InvalidConfig(e.to_string()))?;
    Ok(Arc::new(pool))
}

impl Pipeline {
    /// Start producing batches from `path` on a fresh decode pool.
    pub fn spawn(
        path: &Path,
        range: RecordRange,
        repeat: bool,
        decoder: Arc<dyn RecordDecoder>,
        config: PipelineConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let pool = decode_pool(config.num_parallel_calls)?;
        Self::spawn_on(pool, path, range, repeat, decoder, config, device)
    }

    /// Start producing batches from `path`, decoding on `pool`.
    pub fn spawn_on(
        pool: Arc<ThreadPool>,
        path: &Path,
        range: RecordRange,
        repeat: bool,
        decoder: Arc<dyn RecordDecoder>,
        config: PipelineConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = bounded(config.buffer_size);
        let producer = Producer {
            path: path.to_path_buf(),
            range,
            repeat,
            decoder,
            config,
            device,
            pool,
        };
        let handle = thread::Builder::new()
            .name("record-pipeline".into())
            .spawn(move || producer.run(tx))?;

        Ok(Self {
            rx,
            producer: Some(handle),
            finished: false,
        })
    }

    /// Reap the producer once the channel has disconnected.
    fn join_producer(&mut self) -> Option<PlungerError> {
        let handle = self.producer.take()?;
        let payload = handle.join().err()?;
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(%message, "record pipeline producer panicked");
        Some(PlungerError::ProducerPanicked(message))
    }
}

impl Iterator for Pipeline {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(item) => {
                if item.is_err() {
                    self.finished = true;
                }
                Some(item)
            }
            Err(_) => {
                self.finished = true;
                self.join_producer().map(Err)
            }
        }
    }
}

struct Producer {
    path: PathBuf,
    range: RecordRange,
    repeat: bool,
    decoder: Arc<dyn RecordDecoder>,
    config: PipelineConfig,
    device: Device,
    pool: Arc<ThreadPool>,
}

/// Why a pass stopped early.
enum Halt {
    /// The consumer went away.
    Disconnected,
    Failed(PlungerError),
}

impl From<PlungerError> for Halt {
    fn from(e: PlungerError) -> Self {
        Halt::Failed(e)
    }
}

impl Producer {
    fn run(self, tx: Sender<Result<Batch>>) {
        let mut pass = 0usize;
        loop {
            match self.pass(&tx) {
                Ok(0) if self.repeat => {
                    let _ = tx.send(Err(PlungerError::EmptySplit { split: "training" }));
                    return;
                }
                Ok(n) => debug!(pass, records = n, path = ?self.path, "pipeline pass complete"),
                Err(Halt::Disconnected) => return,
                Err(Halt::Failed(e)) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
            if !self.repeat {
                return;
            }
            pass += 1;
        }
    }

    /// One pass over the configured range. Returns the number of records read.
    fn pass(&self, tx: &Sender<Result<Batch>>) -> std::result::Result<usize, Halt> {
        let mut reader = RecordReader::open(&self.path)?;
        for _ in 0..self.range.skip {
            if reader.read_record()?.is_none() {
                return Ok(0);
            }
        }

        let chunk_len = self.config.num_parallel_calls * self.config.batch_size;
        let mut remaining = self.range.take.unwrap_or(usize::MAX);
        let mut pending: Vec<SequencePair> = Vec::new();
        let mut total = 0usize;

        loop {
            let mut chunk = Vec::with_capacity(chunk_len.min(remaining));
            while chunk.len() < chunk_len && remaining > 0 {
                match reader.read_record()? {
                    Some(payload) => {
                        chunk.push(payload);
                        remaining -= 1;
                    }
                    None => {
                        remaining = 0;
                    }
                }
            }
            if chunk.is_empty() {
                break;
            }
            total += chunk.len();

            let decoder = &self.decoder;
            let decoded: Result<Vec<SequencePair>> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .map(|payload| decoder.decode(payload).map(|ex| ex.into_sequences()))
                    .collect()
            });
            pending.extend(decoded?);

            while pending.len() >= self.config.batch_size {
                let members: Vec<SequencePair> =
                    pending.drain(..self.config.batch_size).collect();
                self.emit(tx, members)?;
            }
        }

        if !pending.is_empty() {
            self.emit(tx, pending)?;
        }
        Ok(total)
    }

    fn emit(
        &self,
        tx: &Sender<Result<Batch>>,
        members: Vec<SequencePair>,
    ) -> std::result::Result<(), Halt> {
        let batch = collate(members)?.to_batch(&self.device)?;
        tx.send(Ok(batch)).map_err(|_| Halt::Disconnected)
    }
}

/// Builds the training and validation pipelines over one record file.
///
/// Validation reads the first `num_valid` records; training skips them and
/// reads the rest, repeating forever.
pub struct DatasetBuilder {
    path: PathBuf,
    split: DataSplit,
    config: PipelineConfig,
    decoder: Arc<dyn RecordDecoder>,
    device: Device,
    /// Shared by every pipeline this builder spawns.
    pool: Arc<ThreadPool>,
}

impl DatasetBuilder {
    pub fn new(
        path: impl Into<PathBuf>,
        split: DataSplit,
        config: PipelineConfig,
        decoder: Arc<dyn RecordDecoder>,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        let pool = decode_pool(config.num_parallel_calls)?;
        Ok(Self {
            path: path.into(),
            split,
            config,
            decoder,
            device,
            pool,
        })
    }

    pub fn split(&self) -> &DataSplit {
        &self.split
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Repeating pipeline over the training suffix.
    pub fn train(&self) -> Result<Pipeline> {
        if self.split.num_train == 0 {
            return Err(PlungerError::EmptySplit { split: "training" });
        }
        info!(
            path = ?self.path,
            skip = self.split.num_valid,
            batch_size = self.config.batch_size,
            "starting training pipeline"
        );
        Pipeline::spawn_on(
            Arc::clone(&self.pool),
            &self.path,
            RecordRange {
                skip: self.split.num_valid,
                take: None,
            },
            true,
            Arc::clone(&self.decoder),
            self.config,
            self.device.clone(),
        )
    }

    /// Single pass over the validation prefix.
    pub fn validation(&self) -> Result<Pipeline> {
        if self.split.num_valid == 0 {
            return Err(PlungerError::EmptySplit {
                split: "validation",
            });
        }
        debug!(path = ?self.path, take = self.split.num_valid, "starting validation pipeline");
        Pipeline::spawn_on(
            Arc::clone(&self.pool),
            &self.path,
            RecordRange {
                skip: 0,
                take: Some(self.split.num_valid),
            },
            false,
            Arc::clone(&self.decoder),
            self.config,
            self.device.clone(),
        )
    }
}
