//! Import coordinator
//!
//! Wires the stages of an import together:
//!
//! ```text
//! ChunkTransport --(bounded mpsc)--> parser (blocking task) --(bounded mpsc)--> ingestion pool
//! ```
//!
//! Chunks reach the parser strictly in order. Each parsed batch is handed to
//! the [`RecordSink`] as its own task, and at most `max_in_flight` of those
//! run at once. A full pool stalls the parser, which stalls the transport, so
//! memory stays bounded by a few chunks regardless of file size.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::HealthRecord;
use crate::parse::{self, ParserOptions, ParserState};
use crate::progress::{percent_of, ProgressEvent};
use crate::store::{BatchOutcome, RecordSink, RunTotals};
use crate::transport::{ChunkMessage, ChunkTransport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Tuning for one import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub chunk_size: usize,
    pub max_in_flight: usize,
    pub channel_capacity: usize,
    pub parser: ParserOptions,
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.import.chunk_size,
            max_in_flight: config.import.max_in_flight,
            channel_capacity: config.import.channel_capacity,
            parser: config.parser_options(),
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Parser output for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseMessage {
    pub records: Vec<HealthRecord>,
    /// Share of the input consumed so far
    pub progress: f64,
    /// Records emitted since the start of the input
    pub total_count: u64,
}

/// Totals for a finished import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub chunks: u64,
    pub batches: u64,
    pub records_parsed: u64,
    pub records_kept: u64,
    pub records_dropped: u64,
    pub records_inserted: u64,
    pub metadata_inserted: u64,
    pub records_duplicate: u64,
    pub failed_batches: u64,
    pub errors: Vec<String>,
    /// Read failure that cut the input short
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
}

impl ImportSummary {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            chunks: self.chunks,
            records_parsed: self.records_parsed,
            records_inserted: self.records_inserted,
            records_duplicate: self.records_duplicate,
            failed_batches: self.failed_batches,
        }
    }

    /// True when the whole input was read and every batch committed
    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0 && self.transport_error.is_none()
    }

    fn record_outcome(&mut self, outcome: BatchOutcome) {
        self.records_kept += outcome.records;
        self.records_dropped += outcome.dropped;
        self.records_inserted += outcome.inserted_records;
        self.metadata_inserted += outcome.inserted_metadata;
        self.records_duplicate += outcome.records_diff;
    }

    fn record_failure(&mut self, message: String) {
        self.failed_batches += 1;
        self.errors.push(message);
    }
}

struct BatchResult {
    batch: u64,
    result: Result<BatchOutcome>,
}

/// Run the parser on a blocking thread.
///
/// Every `Progress` chunk yields one [`ParseMessage`], even when it completed
/// no record. `Complete` flushes the parser and ends the task. If the chunk
/// channel closes without `Complete` (the transport failed) the parser stops
/// without flushing. Returns the number of records emitted.
pub fn spawn_parser(
    mut chunks: mpsc::Receiver<ChunkMessage>,
    parsed: mpsc::Sender<ParseMessage>,
    options: ParserOptions,
) -> JoinHandle<Result<u64>> {
    tokio::task::spawn_blocking(move || {
        let closed = || Error::Pipeline("ingestion stopped accepting batches".to_string());
        let mut state = ParserState::new(options);

        while let Some(message) = chunks.blocking_recv() {
            match message {
                ChunkMessage::Progress { data, offset, size } => {
                    let consumed = offset + data.len() as u64;
                    let (next, records) = parse::process_chunk(state, data);
                    state = next;
                    parsed
                        .blocking_send(ParseMessage {
                            records,
                            progress: percent_of(consumed, size),
                            total_count: state.total_emitted(),
                        })
                        .map_err(|_| closed())?;
                }
                ChunkMessage::Complete => {
                    let (state, records) = parse::finish(state);
                    parsed
                        .blocking_send(ParseMessage {
                            records,
                            progress: 100.0,
                            total_count: state.total_emitted(),
                        })
                        .map_err(|_| closed())?;
                    return Ok(state.total_emitted());
                }
            }
        }

        debug!("Chunk stream ended without completion, parser state discarded");
        Ok(state.total_emitted())
    })
}

/// Import one input through the sink.
///
/// Failed batches are logged and counted; the import carries on with the
/// rest. A transport failure stops the input, but the batches already parsed
/// still settle and the summary reports it in `transport_error` alongside the
/// partial totals.
pub async fn run_import<R>(
    transport: ChunkTransport<R>,
    sink: Arc<dyn RecordSink>,
    options: &ImportOptions,
    progress: mpsc::UnboundedSender<ProgressEvent>,
) -> Result<ImportSummary>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (chunk_tx, chunk_rx) = mpsc::channel(options.channel_capacity.max(1));
    let (parsed_tx, mut parsed_rx) = mpsc::channel(options.channel_capacity.max(1));

    let transport_task = tokio::spawn(transport.run(chunk_tx, progress.clone()));
    let parser_task = spawn_parser(chunk_rx, parsed_tx, options.parser);

    let permits = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
    let mut batches: JoinSet<BatchResult> = JoinSet::new();
    let mut summary = ImportSummary::default();

    while let Some(message) = parsed_rx.recv().await {
        let _ = progress.send(ProgressEvent::Parse {
            percent: message.progress,
        });

        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Pipeline("ingestion pool closed".to_string()))?;

        let batch = summary.batches;
        summary.batches += 1;
        let sink = Arc::clone(&sink);
        let events = progress.clone();
        let percent = message.progress;

        batches.spawn(async move {
            let result = sink.insert_batch(message.records).await;
            drop(permit);

            let inserted = result.as_ref().map(|o| o.inserted_records).unwrap_or(0);
            let _ = events.send(ProgressEvent::Ingest { percent, inserted });
            BatchResult { batch, result }
        });

        while let Some(joined) = batches.try_join_next() {
            settle(&mut summary, joined);
        }
    }

    while let Some(joined) = batches.join_next().await {
        settle(&mut summary, joined);
    }

    summary.records_parsed = parser_task.await??;
    match transport_task.await? {
        Ok(chunks) => summary.chunks = chunks,
        Err(Error::Transport(message)) => {
            error!("Input stream failed: {}", message);
            // every delivered chunk produced exactly one batch
            summary.chunks = summary.batches;
            summary.transport_error = Some(message);
        }
        Err(e) => return Err(e),
    }

    info!(
        chunks = summary.chunks,
        parsed = summary.records_parsed,
        inserted = summary.records_inserted,
        duplicates = summary.records_duplicate,
        failed_batches = summary.failed_batches,
        "Import finished"
    );
    Ok(summary)
}

fn settle(summary: &mut ImportSummary, joined: std::result::Result<BatchResult, JoinError>) {
    match joined {
        Ok(BatchResult {
            batch,
            result: Ok(outcome),
        }) => {
            debug!(
                batch,
                records = outcome.records,
                inserted = outcome.inserted_records,
                "Batch settled"
            );
            summary.record_outcome(outcome);
        }
        Ok(BatchResult {
            batch,
            result: Err(e),
        }) => {
            error!(batch, "Ingestion batch failed: {}", e);
            summary.record_failure(format!("batch {}: {}", batch, e));
        }
        Err(e) => {
            error!("Ingestion task aborted: {}", e);
            summary.record_failure(format!("ingestion task: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{aggregate, ImportProgress};
    use crate::store::{partition_valid, HealthDb};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <Record type="HKQuantityTypeIdentifierHeartRate" sourceName="Watch" sourceVersion="10.1" unit="count/min" creationDate="2024-01-15 10:30:00 +0000" startDate="2024-01-15 10:29:00 +0000" endDate="2024-01-15 10:29:00 +0000" value="72">
  <MetadataEntry key="HKMetadataKeyHeartRateMotionContext" value="0"/>
 </Record>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone" unit="count" creationDate="2024-01-15 11:00:00 +0000" startDate="2024-01-15 10:50:00 +0000" endDate="2024-01-15 11:00:00 +0000" value="120"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone" unit="count" creationDate="2024-01-16 11:00:00 +0000" startDate="2024-01-16 10:50:00 +0000" endDate="2024-01-16 11:00:00 +0000" value="80"/>
 <Record type="HKCategoryTypeIdentifierSleepAnalysis" sourceName="Watch" creationDate="2024-01-16 07:00:00 +0000" startDate="2024-01-15 23:00:00 +0000" endDate="2024-01-16 07:00:00 +0000" value="HKCategoryValueSleepAnalysisAsleep"/>
</HealthData>
"#;

    fn transport(input: &str, chunk_size: usize) -> ChunkTransport<Cursor<Vec<u8>>> {
        let bytes = input.as_bytes().to_vec();
        let size = bytes.len() as u64;
        ChunkTransport::new(Cursor::new(bytes), size, chunk_size)
    }

    fn options(chunk_size: usize, max_in_flight: usize) -> ImportOptions {
        ImportOptions {
            chunk_size,
            max_in_flight,
            channel_capacity: 1,
            parser: ParserOptions::default(),
        }
    }

    /// Sink that records what it saw, optionally failing batches that hold a given type.
    #[derive(Default)]
    struct RecordingSink {
        ids: Mutex<Vec<String>>,
        fail_type: Option<String>,
        delay: Option<Duration>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        async fn insert_batch(&self, records: Vec<HealthRecord>) -> Result<BatchOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(fail_type) = &self.fail_type {
                if records.iter().any(|r| &r.record_type == fail_type) {
                    return Err(Error::Other("simulated commit failure".to_string()));
                }
            }

            let (kept, dropped) = partition_valid(records);
            self.ids
                .lock()
                .unwrap()
                .extend(kept.iter().map(|r| r.id.clone()));
            Ok(BatchOutcome {
                records: kept.len() as u64,
                dropped,
                inserted_records: kept.len() as u64,
                ..Default::default()
            })
        }
    }

    async fn run_with_progress(
        transport: ChunkTransport<Cursor<Vec<u8>>>,
        sink: Arc<dyn RecordSink>,
        options: ImportOptions,
    ) -> (Result<ImportSummary>, ImportProgress) {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = tokio::spawn(aggregate(rx, None));
        let summary = run_import(transport, sink, &options, tx).await;
        (summary, aggregator.await.unwrap())
    }

    #[tokio::test]
    async fn test_import_into_database() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = HealthDb::open(&config).await.unwrap();
        let sink: Arc<dyn RecordSink> = Arc::new(db.clone());

        let (summary, progress) =
            run_with_progress(transport(EXPORT, 64), Arc::clone(&sink), options(64, 2)).await;
        let summary = summary.unwrap();

        assert_eq!(summary.records_parsed, 4);
        assert_eq!(summary.records_kept, 3);
        assert_eq!(summary.records_dropped, 1);
        assert_eq!(summary.records_inserted, 3);
        assert_eq!(summary.metadata_inserted, 1);
        assert!(summary.is_clean());
        assert_eq!(summary.chunks, EXPORT.len().div_ceil(64) as u64);

        assert_eq!(progress.transfer, 100.0);
        assert_eq!(progress.parse, 100.0);
        assert_eq!(progress.total_count, 3);

        // Same input again, different chunking
        let (again, progress) =
            run_with_progress(transport(EXPORT, 7), sink, options(7, 4)).await;
        let again = again.unwrap();
        assert_eq!(again.records_inserted, 0);
        assert_eq!(again.records_duplicate, 3);
        assert_eq!(progress.total_count, 0);
        assert_eq!(db.count_records().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_import() {
        let sink = Arc::new(RecordingSink {
            fail_type: Some("HKQuantityTypeIdentifierHeartRate".to_string()),
            ..Default::default()
        });

        // One line per chunk keeps the heart-rate record alone in its batch
        let (summary, _) =
            run_with_progress(transport(EXPORT, 1), sink.clone(), options(1, 2)).await;
        let summary = summary.unwrap();

        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(!summary.is_clean());
        assert_eq!(summary.records_inserted, 2);
        assert_eq!(sink.ids.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_batches_are_bounded() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });

        let (summary, _) =
            run_with_progress(transport(EXPORT, 3), sink.clone(), options(3, 2)).await;
        let summary = summary.unwrap();

        assert!(summary.batches > 2);
        assert!(sink.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(summary.records_inserted, 3);
    }

    #[tokio::test]
    async fn test_empty_input_completes() {
        let sink = Arc::new(RecordingSink::default());
        let (summary, progress) = run_with_progress(transport("", 16), sink, options(16, 1)).await;
        let summary = summary.unwrap();

        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.records_parsed, 0);
        // the final flush still makes one (empty) batch
        assert_eq!(summary.batches, 1);
        assert_eq!(progress.transfer, 100.0);
        assert_eq!(progress.parse, 100.0);
        assert_eq!(progress.ingest, 100.0);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_totals() {
        let reader = tokio_test::io::Builder::new()
            .read(&EXPORT.as_bytes()[..32])
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();
        let transport = ChunkTransport::new(reader, EXPORT.len() as u64, 32);
        let sink = Arc::new(RecordingSink::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = run_import(transport, sink.clone(), &options(32, 1), tx)
            .await
            .unwrap();
        assert!(summary.transport_error.as_deref().unwrap().contains("disk gone"));
        assert!(!summary.is_clean());
        assert_eq!(summary.chunks, 1);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.records_parsed, 0);
        assert!(sink.ids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_after_records_settles_them() {
        let cut = EXPORT.len() - 20;
        let reader = tokio_test::io::Builder::new()
            .read(&EXPORT.as_bytes()[..cut])
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();
        let transport = ChunkTransport::new(reader, EXPORT.len() as u64, 64);
        let sink = Arc::new(RecordingSink::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = run_import(transport, sink.clone(), &options(64, 2), tx)
            .await
            .unwrap();
        assert!(summary.transport_error.is_some());
        assert_eq!(summary.chunks, (cut / 64) as u64);
        assert!(summary.records_inserted >= 1);
        assert_eq!(
            summary.records_inserted,
            sink.ids.lock().unwrap().len() as u64
        );
    }

    #[test]
    fn test_parse_message_wire_format() {
        let message = ParseMessage {
            records: Vec::new(),
            progress: 50.0,
            total_count: 7,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["totalCount"], 7);
        assert_eq!(json["progress"], 50.0);
    }
}
