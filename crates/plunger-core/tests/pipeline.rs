//! End-to-end pipeline tests over generated record files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use candle_core::Device;
use plunger_core::{
    DataSplit, DatasetBuilder, FEATURE_CHANNELS, JsonWellDecoder, Pipeline, PipelineConfig,
    PlungerError, RecordDecoder, RecordRange, RecordWriter, TARGET_CHANNELS, WellExample,
    WellRecord, count_data_items, latest_file,
};

/// Counts decode calls and panics on call `panic_at` (1-based), if set.
struct CountingDecoder {
    calls: Arc<AtomicUsize>,
    panic_at: Option<usize>,
}

impl CountingDecoder {
    fn new(panic_at: Option<usize>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let decoder = Self {
            calls: Arc::clone(&calls),
            panic_at,
        };
        (decoder, calls)
    }
}

impl RecordDecoder for CountingDecoder {
    fn decode(&self, payload: &[u8]) -> plunger_core::Result<WellExample> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_at == Some(call) {
            panic!("decoder gave out on record {call}");
        }
        JsonWellDecoder.decode(payload)
    }
}

fn whole_file() -> RecordRange {
    RecordRange {
        skip: 0,
        take: None,
    }
}

/// Well `i` has `lengths[i]` steps; every value at step `t` equals `i * 100 + t + 1`.
fn write_wells(dir: &Path, lengths: &[usize]) -> PathBuf {
    let path = dir.join(format!("wells-{}-Records.tfrecord", lengths.len()));
    let mut writer = RecordWriter::create(&path).unwrap();
    for (i, &len) in lengths.iter().enumerate() {
        let value = |t: usize| (i * 100 + t + 1) as f32;
        let record = WellRecord {
            uwi: format!("uwi-{i}"),
            features: (0..len).map(|t| vec![value(t); FEATURE_CHANNELS]).collect(),
            targets: (0..len).map(|t| vec![value(t); TARGET_CHANNELS]).collect(),
        };
        writer
            .write_record(&serde_json::to_vec(&record).unwrap())
            .unwrap();
    }
    writer.finish().unwrap();
    path
}

fn builder(path: &Path, config: PipelineConfig) -> DatasetBuilder {
    let n = count_data_items(&[path]).unwrap();
    let split = DataSplit::new(n, 0.1).unwrap();
    DatasetBuilder::new(
        path,
        split,
        config,
        Arc::new(JsonWellDecoder),
        Device::Cpu,
    )
    .unwrap()
}

/// First target value of every non-padded member, in batch order.
fn first_values(pipeline: impl Iterator<Item = plunger_core::Result<plunger_core::Batch>>) -> Vec<f32> {
    let mut out = Vec::new();
    for batch in pipeline {
        let batch = batch.unwrap();
        let targets = batch.targets.to_vec3::<f32>().unwrap();
        let max_len = batch.targets.dims()[1];
        for (member, len) in batch.lengths.iter().enumerate() {
            out.push(targets[member][max_len - len][0]);
        }
    }
    out
}

#[test]
fn validation_takes_prefix_and_training_takes_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wells(dir.path(), &[2; 10]);
    let builder = builder(&path, PipelineConfig::default());
    assert_eq!(builder.split().num_valid, 1);
    assert_eq!(builder.split().num_train, 9);

    let valid = first_values(builder.validation().unwrap());
    assert_eq!(valid, vec![1.0]);

    // 9 training wells in batches of 2 is 5 batches per pass; take two passes.
    let train = first_values(builder.train().unwrap().take(10));
    let one_pass: Vec<f32> = (1..10).map(|i| (i * 100 + 1) as f32).collect();
    assert_eq!(&train[..9], one_pass.as_slice());
    assert_eq!(&train[9..], one_pass.as_slice());
}

#[test]
fn batches_lead_with_padding() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wells(dir.path(), &[3, 5]);
    let pipeline = Pipeline::spawn(
        &path,
        whole_file(),
        false,
        Arc::new(JsonWellDecoder),
        PipelineConfig::default(),
        Device::Cpu,
    )
    .unwrap();

    let batches: Vec<_> = pipeline.map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.features.dims(), &[2, 5, FEATURE_CHANNELS]);

    let targets = batch.targets.to_vec3::<f32>().unwrap();
    let short: Vec<f32> = targets[0].iter().map(|row| row[0]).collect();
    assert_eq!(short, vec![0.0, 0.0, 1.0, 2.0, 3.0]);
    let long: Vec<f32> = targets[1].iter().map(|row| row[1]).collect();
    assert_eq!(long, vec![101.0, 102.0, 103.0, 104.0, 105.0]);
}

#[test]
fn corrupt_payload_ends_stream_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad-2-Records.tfrecord");
    let mut writer = RecordWriter::create(&path).unwrap();
    writer.write_record(b"{\"uwi\": 1}").unwrap();
    writer.write_record(b"{}").unwrap();
    writer.finish().unwrap();

    let mut pipeline = Pipeline::spawn(
        &path,
        whole_file(),
        true,
        Arc::new(JsonWellDecoder),
        PipelineConfig::default(),
        Device::Cpu,
    )
    .unwrap();

    assert!(matches!(pipeline.next(), Some(Err(PlungerError::Decode(_)))));
    assert!(pipeline.next().is_none());
}

#[test]
fn empty_training_split_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("none-0-Records.tfrecord");
    RecordWriter::create(&path).unwrap().finish().unwrap();

    let builder = builder(&path, PipelineConfig::default());
    assert!(matches!(
        builder.train(),
        Err(PlungerError::EmptySplit { split: "training" })
    ));
}

#[test]
fn newest_record_file_is_selected_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    write_wells(dir.path(), &[1; 3]);
    std::thread::sleep(std::time::Duration::from_millis(20));
    let newest = write_wells(dir.path(), &[1; 4]);

    let latest = latest_file(dir.path()).unwrap();
    assert_eq!(latest, newest);
    assert_eq!(count_data_items(&[latest]).unwrap(), 4);
}

#[test]
fn zero_sized_config_rejected() {
    assert!(PipelineConfig::default().with_batch_size(0).validate().is_err());
    assert!(PipelineConfig::default().with_buffer_size(0).validate().is_err());
    assert!(PipelineConfig::default().with_parallel_calls(0).validate().is_err());
}

#[test]
fn producer_panic_is_reported_not_swallowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wells(dir.path(), &[2; 40]);
    let (decoder, _) = CountingDecoder::new(Some(4));
    let config = PipelineConfig::default()
        .with_batch_size(2)
        .with_parallel_calls(1);

    let items: Vec<_> = Pipeline::spawn(
        &path,
        RecordRange {
            skip: 0,
            take: Some(40),
        },
        false,
        Arc::new(decoder),
        config,
        Device::Cpu,
    )
    .unwrap()
    .collect();

    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    match &items[1] {
        Err(PlungerError::ProducerPanicked(message)) => {
            assert!(message.contains("record 4"), "{message}");
        }
        other => panic!("expected a producer panic, got {other:?}"),
    }
}

#[test]
fn prefetch_stays_bounded_without_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wells(dir.path(), &[2; 50]);
    let (decoder, calls) = CountingDecoder::new(None);
    let config = PipelineConfig::default()
        .with_batch_size(1)
        .with_parallel_calls(1)
        .with_buffer_size(1);

    let mut pipeline = Pipeline::spawn(
        &path,
        whole_file(),
        true,
        Arc::new(decoder),
        config,
        Device::Cpu,
    )
    .unwrap();

    // One batch in the channel, one decoded chunk blocked on send.
    let bound = config.buffer_size + config.num_parallel_calls * config.batch_size + 1;
    std::thread::sleep(Duration::from_millis(200));
    let idle = calls.load(Ordering::SeqCst);
    assert!(idle >= 1 && idle <= bound, "decoded {idle} records while idle");

    pipeline.next().unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let after_one = calls.load(Ordering::SeqCst);
    assert!(after_one <= bound + 1, "decoded {after_one} records after one batch");
}
