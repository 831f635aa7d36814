//! Import progress: the aggregator reducer, its terminal rendering, and a
//! tracing writer that keeps the progress bars pinned below log output.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Bars are drawn in hundredths of a percent.
const BAR_SCALE: f64 = 100.0;

/// One update from a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Share of the file handed to the parser
    Transfer { percent: f64 },
    /// Share of the file parsed
    Parse { percent: f64 },
    /// An ingestion batch finished
    Ingest { percent: f64, inserted: u64 },
}

/// Combined progress of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub transfer: f64,
    pub parse: f64,
    pub ingest: f64,
    /// Records newly inserted so far
    pub total_count: u64,
}

impl ImportProgress {
    /// Fold one event into the state.
    ///
    /// Percentages replace the previous value; the inserted count
    /// accumulates, so batches may complete in any order.
    pub fn apply(self, event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Transfer { percent } => Self {
                transfer: normalize_percent(percent),
                ..self
            },
            ProgressEvent::Parse { percent } => Self {
                parse: normalize_percent(percent),
                ..self
            },
            ProgressEvent::Ingest { percent, inserted } => Self {
                ingest: normalize_percent(percent),
                total_count: self.total_count + inserted,
                ..self
            },
        }
    }
}

/// An undefined percentage (e.g. 0/0 for an empty file) counts as complete.
pub fn normalize_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        100.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// `done / total` as a percentage; NaN when `total` is zero.
pub fn percent_of(done: u64, total: u64) -> f64 {
    done as f64 / total as f64 * 100.0
}

/// Three pinned bars: transfer, parse, ingest.
pub struct ProgressDisplay {
    transfer: ProgressBar,
    parse: ProgressBar,
    ingest: ProgressBar,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self {
            transfer: stage_bar("Importing"),
            parse: stage_bar("Parsing"),
            ingest: stage_bar("Ingesting"),
        }
    }

    pub fn render(&self, progress: &ImportProgress) {
        self.transfer.set_position(scaled(progress.transfer));
        self.parse.set_position(scaled(progress.parse));
        self.ingest.set_position(scaled(progress.ingest));
        self.ingest
            .set_message(format!("Ingesting ({} added)", progress.total_count));
    }

    pub fn finish(&self, progress: &ImportProgress) {
        self.render(progress);
        self.transfer.finish();
        self.parse.finish();
        self.ingest.finish_with_message(format!(
            "Ingested ({} records added)",
            progress.total_count
        ));
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}

fn stage_bar(message: &str) -> ProgressBar {
    let pb = multi_progress().add(ProgressBar::new((100.0 * BAR_SCALE) as u64));
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:>3}% {msg}",
        )
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn scaled(percent: f64) -> u64 {
    (normalize_percent(percent) * BAR_SCALE).round() as u64
}

/// Drain progress events until every sender is gone, returning the final state.
pub async fn aggregate(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    display: Option<ProgressDisplay>,
) -> ImportProgress {
    let mut progress = ImportProgress::default();

    while let Some(event) = events.recv().await {
        progress = progress.apply(event);
        if let Some(display) = &display {
            display.render(&progress);
        }
    }

    if let Some(display) = &display {
        display.finish(&progress);
    }
    progress
}

#[derive(Default, Clone)]
pub struct LogWriterFactory;

/// Line-buffered writer that prints through the shared `MultiProgress`.
pub struct LogWriter {
    buffer: String,
}

impl LogWriter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn emit(line: &str) {
        let _ = multi_progress().println(line.trim_end_matches('\r'));
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.buffer.find('\n') {
            Self::emit(&self.buffer[..idx]);
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            Self::emit(self.buffer.trim_end_matches('\n'));
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentages_replace() {
        let progress = ImportProgress::default()
            .apply(ProgressEvent::Transfer { percent: 40.0 })
            .apply(ProgressEvent::Transfer { percent: 80.0 })
            .apply(ProgressEvent::Parse { percent: 50.0 });
        assert_eq!(progress.transfer, 80.0);
        assert_eq!(progress.parse, 50.0);
        assert_eq!(progress.ingest, 0.0);
    }

    #[test]
    fn test_ingest_count_accumulates_in_any_order() {
        let events = [
            ProgressEvent::Ingest { percent: 50.0, inserted: 3 },
            ProgressEvent::Ingest { percent: 100.0, inserted: 5 },
        ];
        let forward = events
            .iter()
            .fold(ImportProgress::default(), |p, e| p.apply(*e));
        let backward = events
            .iter()
            .rev()
            .fold(ImportProgress::default(), |p, e| p.apply(*e));
        assert_eq!(forward.total_count, 8);
        assert_eq!(backward.total_count, 8);
    }

    #[test]
    fn test_nan_guard() {
        assert!(percent_of(0, 0).is_nan());
        let progress = ImportProgress::default()
            .apply(ProgressEvent::Transfer { percent: percent_of(0, 0) })
            .apply(ProgressEvent::Parse { percent: f64::NAN })
            .apply(ProgressEvent::Ingest { percent: f64::NAN, inserted: 0 });
        assert_eq!(progress.transfer, 100.0);
        assert_eq!(progress.parse, 100.0);
        assert_eq!(progress.ingest, 100.0);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(1, 4), 25.0);
        assert_eq!(percent_of(4, 4), 100.0);
    }

    #[tokio::test]
    async fn test_aggregate_drains_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ProgressEvent::Transfer { percent: 100.0 }).unwrap();
        tx.send(ProgressEvent::Ingest { percent: 100.0, inserted: 7 }).unwrap();
        drop(tx);

        let progress = aggregate(rx, None).await;
        assert_eq!(progress.transfer, 100.0);
        assert_eq!(progress.total_count, 7);
    }
}
