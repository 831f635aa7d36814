//! Import command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{run_import, ImportOptions, ImportSummary};
use crate::progress::{aggregate, ImportProgress, ProgressDisplay};
use crate::store::{HealthDb, RecordSink, RunStatus, RunTotals};
use crate::transport::ChunkTransport;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Command-line overrides for the `[import]` config section
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOverrides {
    pub chunk_size: Option<usize>,
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub run_id: String,
    pub file_path: String,
    pub status: RunStatus,
    pub summary: ImportSummary,
    pub progress: ImportProgress,
}

fn resolve_options(config: &Config, overrides: ImportOverrides) -> Result<ImportOptions> {
    let mut options = ImportOptions::from_config(config);
    if let Some(chunk_size) = overrides.chunk_size {
        if chunk_size == 0 {
            return Err(Error::Config("--chunk-size must be positive".to_string()));
        }
        options.chunk_size = chunk_size;
    }
    if let Some(max_in_flight) = overrides.max_in_flight {
        if max_in_flight == 0 {
            return Err(Error::Config("--max-in-flight must be at least 1".to_string()));
        }
        options.max_in_flight = max_in_flight;
    }
    Ok(options)
}

/// Import one export file, recording the run in the database
pub async fn cmd_import(
    config: &Config,
    db: &HealthDb,
    path: &Path,
    overrides: ImportOverrides,
    show_progress: bool,
) -> Result<ImportReport> {
    let options = resolve_options(config, overrides)?;
    let file_path = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string();

    let transport = ChunkTransport::open(path, options.chunk_size).await?;
    import_from(db, file_path, transport, &options, show_progress).await
}

/// Run the pipeline over an opened transport and record the run.
///
/// A read failure mid-stream still stores the partial totals on the failed
/// run before the transport error is returned.
async fn import_from<R>(
    db: &HealthDb,
    file_path: String,
    transport: ChunkTransport<R>,
    options: &ImportOptions,
    show_progress: bool,
) -> Result<ImportReport>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let run = db.start_import_run(&file_path).await?;
    info!(run = %run.id, file = %file_path, "Starting import");

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let display = show_progress.then(ProgressDisplay::new);
    let aggregator = tokio::spawn(aggregate(progress_rx, display));

    let sink: Arc<dyn RecordSink> = Arc::new(db.clone());
    let result = run_import(transport, sink, options, progress_tx).await;
    let progress = aggregator.await?;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            db.complete_import_run(
                &run.id,
                RunStatus::Failed,
                RunTotals::default(),
                Some(vec![e.to_string()]),
            )
            .await?;
            return Err(e);
        }
    };

    let status = if summary.is_clean() {
        RunStatus::Completed
    } else {
        if summary.failed_batches > 0 {
            warn!(
                "{} ingestion batches failed; their records were not stored",
                summary.failed_batches
            );
        }
        RunStatus::Failed
    };

    let mut errors = summary.errors.clone();
    errors.extend(summary.transport_error.iter().cloned());
    let errors = (!errors.is_empty()).then_some(errors);
    db.complete_import_run(&run.id, status, summary.totals(), errors)
        .await?;

    if let Some(message) = summary.transport_error {
        warn!(
            run = %run.id,
            chunks = summary.chunks,
            inserted = summary.records_inserted,
            "Import stopped early; records already stored were kept"
        );
        return Err(Error::Transport(message));
    }

    Ok(ImportReport {
        run_id: run.id,
        file_path,
        status,
        summary,
        progress,
    })
}

pub fn print_import_summary(report: &ImportReport) {
    let summary = &report.summary;
    match report.status {
        RunStatus::Completed => println!("\n✓ Import complete"),
        _ => println!("\n⚠ Import finished with errors"),
    }
    println!("  File: {}", report.file_path);
    println!("  Chunks read: {}", summary.chunks);
    println!("  Records parsed: {}", summary.records_parsed);
    println!("  Records added: {}", summary.records_inserted);
    println!("  Already stored: {}", summary.records_duplicate);
    println!("  Invalid (skipped): {}", summary.records_dropped);
    println!("  Metadata entries added: {}", summary.metadata_inserted);

    if summary.failed_batches > 0 {
        println!("  Failed batches: {}", summary.failed_batches);
        for error in &summary.errors {
            println!("    - {}", error);
        }
    }
}
