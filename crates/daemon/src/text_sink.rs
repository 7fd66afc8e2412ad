//! Tab-separated sample dump, one row per decoded frame.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use unicorn_sensor::{Sample, SampleSource, CHANNEL_LABELS};

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Acquisition loop for `--sink text`: header row, then one row per
/// frame until the stop flag clears. Rows go to `out`, or stdout when
/// no file is given.
pub fn run(
    mut source: Box<dyn SampleSource>,
    out: Option<&Path>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let destination: Box<dyn Write> = match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("could not create output file '{}'", path.display()))?;
            info!("Writing samples to {}", path.display());
            Box::new(file)
        }
        None => Box::new(io::stdout()),
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(destination);
    writer.write_record(CHANNEL_LABELS)?;
    writer.flush()?;

    source.start_streaming().context("could not start acquisition")?;

    let mut rows: u64 = 0;
    let result = write_rows(source.as_mut(), &mut writer, &running, &mut rows);

    if let Err(e) = source.stop_streaming() {
        warn!("Device stop failed: {}", e);
    }
    writer.flush().context("could not flush output")?;
    info!("Text sink stopped after {} rows.", rows);
    result
}

fn write_rows<W: Write>(
    source: &mut dyn SampleSource,
    writer: &mut csv::Writer<W>,
    running: &Arc<AtomicBool>,
    rows: &mut u64,
) -> Result<()> {
    let mut record = Vec::with_capacity(CHANNEL_LABELS.len());
    let mut last_flush = Instant::now();
    while running.load(Ordering::SeqCst) {
        let sample = source.read_sample().context("acquisition failed")?;
        format_record(&sample, &mut record);
        writer.write_record(&record)?;
        *rows += 1;

        let now = Instant::now();
        if now.duration_since(last_flush) >= FLUSH_INTERVAL {
            writer.flush()?;
            last_flush = now;
            debug!("{} rows written", rows);
        }
    }
    Ok(())
}

/// One row in [`CHANNEL_LABELS`] order. The counter column stays an
/// integer; everything else is shortest-round-trip float text.
fn format_record(sample: &Sample, record: &mut Vec<String>) {
    record.clear();
    for value in sample.eeg {
        record.push(value.to_string());
    }
    for value in sample.accel {
        record.push(value.to_string());
    }
    for value in sample.gyro {
        record.push(value.to_string());
    }
    record.push(sample.battery.to_string());
    record.push(sample.counter.to_string());
}
