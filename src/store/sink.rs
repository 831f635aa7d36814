//! Transactional bulk ingestion of parsed records

use super::HealthDb;
use crate::error::Result;
use crate::models::HealthRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, warn};

/// Rows per INSERT statement, kept under SQLite's bound-parameter limit
const RECORD_ROWS_PER_STATEMENT: usize = 1000;
const METADATA_ROWS_PER_STATEMENT: usize = 3000;

/// Result of ingesting one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// Valid records submitted for insertion
    pub records: u64,
    /// Records rejected by validation before the transaction
    pub dropped: u64,
    pub inserted_records: u64,
    pub inserted_metadata: u64,
    /// Records already stored (valid minus inserted)
    pub records_diff: u64,
}

/// Destination for parsed record batches
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert a batch atomically, skipping records that already exist
    async fn insert_batch(&self, records: Vec<HealthRecord>) -> Result<BatchOutcome>;
}

/// Split off records that cannot be stored. Returns the keepers and the drop count.
pub fn partition_valid(records: Vec<HealthRecord>) -> (Vec<HealthRecord>, u64) {
    let before = records.len();
    let kept: Vec<HealthRecord> = records.into_iter().filter(|r| r.is_valid()).collect();
    let dropped = (before - kept.len()) as u64;
    (kept, dropped)
}

/// Column-oriented view of a batch, one vector per `records` column
#[derive(Debug, Default)]
pub struct RecordColumns {
    pub ids: Vec<String>,
    pub types: Vec<String>,
    pub source_names: Vec<Option<String>>,
    pub source_versions: Vec<Option<String>>,
    pub devices: Vec<Option<String>>,
    pub units: Vec<Option<String>>,
    pub values: Vec<f64>,
    pub creation_dates: Vec<Option<String>>,
    pub start_dates: Vec<Option<String>>,
    pub end_dates: Vec<Option<String>>,
}

impl RecordColumns {
    pub fn from_records(records: &[HealthRecord]) -> Self {
        let mut cols = Self::default();
        for r in records {
            cols.ids.push(r.id.clone());
            cols.types.push(r.record_type.clone());
            cols.source_names.push(r.source_name.clone());
            cols.source_versions.push(r.source_version.clone());
            cols.devices.push(r.device.clone());
            cols.units.push(r.unit.clone());
            cols.values.push(r.value);
            cols.creation_dates.push(r.creation_date.clone());
            cols.start_dates.push(r.start_date.clone());
            cols.end_dates.push(r.end_date.clone());
        }
        cols
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Flattened (record_id, key, value) triples for every metadata entry
#[derive(Debug, Default)]
pub struct MetadataColumns {
    pub record_ids: Vec<String>,
    pub keys: Vec<String>,
    pub values: Vec<String>,
}

impl MetadataColumns {
    pub fn from_records(records: &[HealthRecord]) -> Self {
        let mut cols = Self::default();
        for r in records {
            for entry in &r.metadata {
                cols.record_ids.push(r.id.clone());
                cols.keys.push(entry.key.clone());
                cols.values.push(entry.value.clone());
            }
        }
        cols
    }

    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }
}

async fn insert_record_columns(conn: &mut SqliteConnection, cols: &RecordColumns) -> Result<u64> {
    let mut inserted = 0;
    let mut start = 0;
    while start < cols.len() {
        let end = (start + RECORD_ROWS_PER_STATEMENT).min(cols.len());
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO records (id, type, source_name, source_version, device, unit, \
             value, creation_date, start_date, end_date) ",
        );
        builder.push_values(start..end, |mut row, i| {
            row.push_bind(cols.ids[i].clone())
                .push_bind(cols.types[i].clone())
                .push_bind(cols.source_names[i].clone())
                .push_bind(cols.source_versions[i].clone())
                .push_bind(cols.devices[i].clone())
                .push_bind(cols.units[i].clone())
                .push_bind(cols.values[i])
                .push_bind(cols.creation_dates[i].clone())
                .push_bind(cols.start_dates[i].clone())
                .push_bind(cols.end_dates[i].clone());
        });
        builder.push(" ON CONFLICT (id) DO NOTHING");

        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected();
        start = end;
    }
    Ok(inserted)
}

async fn insert_metadata_columns(
    conn: &mut SqliteConnection,
    cols: &MetadataColumns,
) -> Result<u64> {
    let mut inserted = 0;
    let mut start = 0;
    while start < cols.len() {
        let end = (start + METADATA_ROWS_PER_STATEMENT).min(cols.len());
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO record_metadata (record_id, key, value) ");
        builder.push_values(start..end, |mut row, i| {
            row.push_bind(cols.record_ids[i].clone())
                .push_bind(cols.keys[i].clone())
                .push_bind(cols.values[i].clone());
        });
        builder.push(" ON CONFLICT (record_id, key) DO NOTHING");

        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected();
        start = end;
    }
    Ok(inserted)
}

impl HealthDb {
    /// Validate, then insert records and their metadata in a single transaction.
    ///
    /// Either the whole batch commits or nothing does.
    pub async fn ingest_batch(&self, records: Vec<HealthRecord>) -> Result<BatchOutcome> {
        let (kept, dropped) = partition_valid(records);
        if dropped > 0 {
            warn!("Dropped {} invalid records from batch", dropped);
        }

        let mut outcome = BatchOutcome {
            records: kept.len() as u64,
            dropped,
            ..Default::default()
        };
        if kept.is_empty() {
            return Ok(outcome);
        }

        let record_cols = RecordColumns::from_records(&kept);
        let metadata_cols = MetadataColumns::from_records(&kept);

        // Rolls back on drop if any insert fails
        let mut tx = self.pool.begin().await?;
        outcome.inserted_records = insert_record_columns(&mut tx, &record_cols).await?;
        if !metadata_cols.is_empty() {
            outcome.inserted_metadata = insert_metadata_columns(&mut tx, &metadata_cols).await?;
        }
        tx.commit().await?;

        outcome.records_diff = outcome.records.saturating_sub(outcome.inserted_records);
        debug!(
            "Batch committed: {} records, {} inserted, {} metadata",
            outcome.records, outcome.inserted_records, outcome.inserted_metadata
        );
        Ok(outcome)
    }
}

#[async_trait]
impl RecordSink for HealthDb {
    async fn insert_batch(&self, records: Vec<HealthRecord>) -> Result<BatchOutcome> {
        self.ingest_batch(records).await
    }
}
