//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::store::{HealthDb, ImportRun, StoreStats};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub identity_scheme: String,
    pub stats: StoreStats,
    pub last_import: Option<ImportRun>,
}

pub async fn cmd_status(config: &Config, db: &HealthDb) -> Result<StatusInfo> {
    info!("Getting status");

    let stats = db.stats().await?;
    let last_import = db.latest_import_run().await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        identity_scheme: config.identity.scheme.to_string(),
        stats,
        last_import,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 health-ingest Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Identity scheme: {}", status.identity_scheme);

    let stats = &status.stats;
    println!("\nStored Data:");
    println!("  Records: {}", stats.total_records);
    println!("  Record types: {}", stats.total_types);
    println!("  Devices: {}", stats.total_devices);
    println!("  Metadata entries: {}", stats.total_metadata);
    if let (Some(first), Some(last)) = (&stats.first_start_date, &stats.last_end_date) {
        println!("  Covering: {} → {}", first, last);
    }

    match &status.last_import {
        Some(run) => {
            println!("\nLast Import:");
            println!("  File: {}", run.file_path);
            println!("  Started: {}", run.started_at);
            println!("  Status: {}", run.status);
            println!(
                "  Parsed: {}, Inserted: {}, Duplicates: {}",
                run.records_parsed, run.records_inserted, run.records_duplicate
            );
            if run.failed_batches > 0 {
                println!("  Failed batches: {}", run.failed_batches);
            }
        }
        None => println!("\nNo imports yet. Use 'health-ingest import <FILE>' to load an export."),
    }
}
