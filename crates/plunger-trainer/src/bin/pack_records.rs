//! Packs JSON-lines well series into a record file whose name carries the
//! record count, as `latest_file` and `count_data_items` expect.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use plunger_core::{RecordWriter, WellRecord};
use plunger_trainer::init_tracing;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pack-records")]
#[command(about = "Convert JSON-lines well series into a counted record file")]
#[command(version)]
struct Cli {
    /// JSON-lines input, one well per line
    input: PathBuf,

    /// Directory receiving `<stem>-<count>-Records.tfrecord`
    #[arg(short, long)]
    out_dir: PathBuf,

    /// File name stem
    #[arg(long, default_value = "wells")]
    stem: String,

    /// Skip malformed wells instead of failing
    #[arg(long)]
    skip_invalid: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let reader = BufReader::new(
        File::open(&cli.input).with_context(|| format!("failed to open {}", cli.input.display()))?,
    );
    fs::create_dir_all(&cli.out_dir)?;
    let partial = cli.out_dir.join(format!(".{}.partial", cli.stem));
    let mut writer = RecordWriter::create(&partial)?;
    let mut skipped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let checked = serde_json::from_str::<WellRecord>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|record| record.to_example().map(|_| record).map_err(Into::into));
        let record = match checked {
            Ok(record) => record,
            Err(e) if cli.skip_invalid => {
                warn!(line = line_no + 1, error = %e, "skipping well");
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.context(format!("line {}", line_no + 1))),
        };

        writer.write_record(&serde_json::to_vec(&record)?)?;
    }

    let count = writer.written();
    writer.finish()?;
    let target = cli
        .out_dir
        .join(format!("{}-{}-Records.tfrecord", cli.stem, count));
    fs::rename(&partial, &target)?;

    info!(records = count, skipped, path = %target.display(), "packed record file");
    Ok(())
}
