//! Health record storage using SQLite
//!
//! This module owns the on-disk store:
//! - Records and their metadata (bulk, idempotent inserts in `sink`)
//! - Import runs (history and stats)
//! - Read-side queries for status, listings, and time series
//! - Ad-hoc SQL for the console (`console`)

mod console;
mod schema;
mod sink;

pub use console::*;
pub use schema::*;
pub use sink::*;

use crate::config::{Config, DatabaseConfig};
use crate::error::{Error, Result};
use crate::models::{HealthRecord, MetadataEntry};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Import run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// One import of an export file
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: String,
    pub file_path: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub chunks: i64,
    pub records_parsed: i64,
    pub records_inserted: i64,
    pub records_duplicate: i64,
    pub failed_batches: i64,
    pub errors_json: Option<String>,
}

impl ImportRun {
    pub fn new(file_path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            chunks: 0,
            records_parsed: 0,
            records_inserted: 0,
            records_duplicate: 0,
            failed_batches: 0,
            errors_json: None,
        }
    }

    pub fn get_status(&self) -> Result<RunStatus> {
        self.status.parse()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Final counters written when a run completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub chunks: u64,
    pub records_parsed: u64,
    pub records_inserted: u64,
    pub records_duplicate: u64,
    pub failed_batches: u64,
}

/// Whole-store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub total_types: u64,
    pub total_devices: u64,
    pub total_metadata: u64,
    pub first_start_date: Option<String>,
    pub last_end_date: Option<String>,
}

/// Filter and page for record listings
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub record_type: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

/// One page of records, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub records: Vec<HealthRecord>,
}

impl RecordPage {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TypeCount {
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub record_type: String,
    pub count: i64,
}

/// Grouping period for time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Day,
    Month,
    Quarter,
    Year,
}

impl TimeUnit {
    /// SQL expression naming the period of a record's local creation date
    fn period_sql(self) -> &'static str {
        match self {
            TimeUnit::Day => "substr(creation_date, 1, 10)",
            TimeUnit::Month => "substr(creation_date, 1, 7)",
            TimeUnit::Quarter => {
                "substr(creation_date, 1, 4) || '-Q' || \
                 CASE \
                   WHEN CAST(substr(creation_date, 6, 2) AS INTEGER) BETWEEN 1 AND 3 THEN '1' \
                   WHEN CAST(substr(creation_date, 6, 2) AS INTEGER) BETWEEN 4 AND 6 THEN '2' \
                   WHEN CAST(substr(creation_date, 6, 2) AS INTEGER) BETWEEN 7 AND 9 THEN '3' \
                   ELSE '4' \
                 END"
            }
            TimeUnit::Year => "substr(creation_date, 1, 4)",
        }
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "day" => Ok(TimeUnit::Day),
            "month" => Ok(TimeUnit::Month),
            "quarter" => Ok(TimeUnit::Quarter),
            "year" => Ok(TimeUnit::Year),
            _ => Err(Error::Config(format!("Unknown time unit: {}", s))),
        }
    }
}

/// Aggregate applied to values within a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Variance,
    Median,
    Mode,
}

/// Sample variance; NULL for periods with fewer than two values.
const VARIANCE_SQL: &str = "CASE WHEN COUNT(value) > 1 THEN \
     (SUM(value * value) - SUM(value) * SUM(value) / COUNT(value)) / (COUNT(value) - 1) \
     END";

impl Aggregation {
    /// SQL aggregate over `value`, or `None` when the period is reduced in memory
    fn sql_expression(self) -> Option<&'static str> {
        match self {
            Aggregation::Sum => Some("SUM(value)"),
            Aggregation::Avg => Some("AVG(value)"),
            Aggregation::Min => Some("MIN(value)"),
            Aggregation::Max => Some("MAX(value)"),
            Aggregation::Count => Some("COUNT(value)"),
            Aggregation::Stddev | Aggregation::Variance => Some(VARIANCE_SQL),
            Aggregation::Median | Aggregation::Mode => None,
        }
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "avg" | "mean" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "count" => Ok(Aggregation::Count),
            "stddev" | "std" => Ok(Aggregation::Stddev),
            "variance" | "var" => Ok(Aggregation::Variance),
            "median" => Ok(Aggregation::Median),
            "mode" => Ok(Aggregation::Mode),
            _ => Err(Error::Config(format!("Unknown aggregation: {}", s))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub record_type: String,
    pub unit: TimeUnit,
    pub aggregation: Aggregation,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: String,
    /// Earliest creation date within the period
    pub timestamp: Option<String>,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, FromRow)]
struct PeriodValue {
    period: String,
    creation_date: String,
    value: f64,
    unit: Option<String>,
}

#[derive(Debug, FromRow)]
struct RecordRow {
    id: String,
    #[sqlx(rename = "type")]
    record_type: String,
    source_name: Option<String>,
    source_version: Option<String>,
    device: Option<String>,
    unit: Option<String>,
    value: f64,
    creation_date: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl From<RecordRow> for HealthRecord {
    fn from(row: RecordRow) -> Self {
        HealthRecord {
            id: row.id,
            record_type: row.record_type,
            source_name: row.source_name,
            source_version: row.source_version,
            device: row.device,
            unit: row.unit,
            value: row.value,
            creation_date: row.creation_date,
            start_date: row.start_date,
            end_date: row.end_date,
            metadata: Vec::new(),
        }
    }
}

/// Storage service handle
#[derive(Clone)]
pub struct HealthDb {
    pool: SqlitePool,
}

impl HealthDb {
    /// Open the database named by the config, creating the schema if needed
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.paths.db_file, &config.database).await
    }

    /// Open a database file directly
    pub async fn open_path(db_path: &Path, options: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(options.busy_timeout_secs));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Run raw SQL (one or more statements)
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Create tables and indexes; safe to repeat
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        self.execute(SCHEMA_SQL).await
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='records'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Drop all stored data and recreate an empty schema
    pub async fn reset(&self) -> Result<()> {
        info!("Resetting health database");
        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(DROP_SQL).execute(&mut *tx).await?;
        tx.commit().await?;
        self.init_schema().await
    }

    // ===== Import Run Operations =====

    pub async fn start_import_run(&self, file_path: &str) -> Result<ImportRun> {
        let run = ImportRun::new(file_path.to_string());
        sqlx::query(
            r#"
            INSERT INTO import_runs (id, file_path, started_at, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.file_path)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    pub async fn complete_import_run(
        &self,
        id: &str,
        status: RunStatus,
        totals: RunTotals,
        errors: Option<Vec<String>>,
    ) -> Result<()> {
        let errors_json = errors.map(|e| serde_json::to_string(&e)).transpose()?;
        sqlx::query(
            r#"
            UPDATE import_runs SET
                completed_at = ?,
                status = ?,
                chunks = ?,
                records_parsed = ?,
                records_inserted = ?,
                records_duplicate = ?,
                failed_batches = ?,
                errors_json = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(totals.chunks as i64)
        .bind(totals.records_parsed as i64)
        .bind(totals.records_inserted as i64)
        .bind(totals.records_duplicate as i64)
        .bind(totals.failed_batches as i64)
        .bind(errors_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_import_run(&self, id: &str) -> Result<Option<ImportRun>> {
        let run = sqlx::query_as::<_, ImportRun>("SELECT * FROM import_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    pub async fn latest_import_run(&self) -> Result<Option<ImportRun>> {
        let run = sqlx::query_as::<_, ImportRun>(
            "SELECT * FROM import_runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Queries =====

    pub async fn stats(&self) -> Result<StoreStats> {
        let (records, types, devices, first, last): (
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT type), COUNT(DISTINCT device),
                   MIN(start_date), MAX(end_date)
            FROM records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let metadata: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record_metadata")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            total_records: records as u64,
            total_types: types as u64,
            total_devices: devices as u64,
            total_metadata: metadata as u64,
            first_start_date: first,
            last_end_date: last,
        })
    }

    pub async fn count_records(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Page through records ordered by start date, newest first
    pub async fn list_records(&self, query: &RecordQuery) -> Result<RecordPage> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM records");
        if let Some(record_type) = &query.record_type {
            count.push(" WHERE type = ").push_bind(record_type.clone());
        }
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(
            "SELECT id, type, source_name, source_version, device, unit, value, \
             creation_date, start_date, end_date FROM records",
        );
        if let Some(record_type) = &query.record_type {
            select.push(" WHERE type = ").push_bind(record_type.clone());
        }
        select
            .push(" ORDER BY start_date DESC, id LIMIT ")
            .push_bind(query.page_size as i64)
            .push(" OFFSET ")
            .push_bind(query.page as i64 * query.page_size as i64);

        let rows: Vec<RecordRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let mut records: Vec<HealthRecord> = rows.into_iter().map(HealthRecord::from).collect();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let mut metadata = self.metadata_for(&ids).await?;
        for record in &mut records {
            if let Some(entries) = metadata.remove(&record.id) {
                record.metadata = entries;
            }
        }

        Ok(RecordPage {
            total: total as u64,
            page: query.page,
            page_size: query.page_size,
            records,
        })
    }

    async fn metadata_for(&self, ids: &[&str]) -> Result<HashMap<String, Vec<MetadataEntry>>> {
        let mut by_record: HashMap<String, Vec<MetadataEntry>> = HashMap::new();
        if ids.is_empty() {
            return Ok(by_record);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT record_id, key, value FROM record_metadata WHERE record_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(") ORDER BY record_id, key");

        let rows: Vec<(String, String, String)> =
            builder.build_query_as().fetch_all(&self.pool).await?;
        for (record_id, key, value) in rows {
            by_record
                .entry(record_id)
                .or_default()
                .push(MetadataEntry { key, value });
        }
        Ok(by_record)
    }

    /// Distinct record types with their counts
    pub async fn list_types(&self) -> Result<Vec<TypeCount>> {
        let types = sqlx::query_as::<_, TypeCount>(
            "SELECT type, COUNT(*) AS count FROM records GROUP BY type ORDER BY type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(types)
    }

    /// Aggregate one record type per period of its creation date.
    ///
    /// Periods use the local date written in the export, not UTC.
    pub async fn series(&self, query: &SeriesQuery) -> Result<Vec<SeriesPoint>> {
        let Some(aggregate) = query.aggregation.sql_expression() else {
            return self.series_in_memory(query).await;
        };

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {period} AS period, \
             MIN(creation_date) AS timestamp, \
             CAST({aggregate} AS REAL) AS value, \
             MIN(unit) AS unit \
             FROM records",
            period = query.unit.period_sql(),
        ));
        push_series_filter(&mut builder, query);
        builder.push(" GROUP BY period ORDER BY period");

        let mut points: Vec<SeriesPoint> = builder.build_query_as().fetch_all(&self.pool).await?;

        // rounding can leave a tiny negative variance for constant values
        match query.aggregation {
            Aggregation::Variance => {
                for point in &mut points {
                    point.value = point.value.map(|v| v.max(0.0));
                }
            }
            Aggregation::Stddev => {
                for point in &mut points {
                    point.value = point.value.map(|v| v.max(0.0).sqrt());
                }
            }
            _ => {}
        }
        Ok(points)
    }

    /// Median and mode have no SQLite aggregate, so periods are reduced here
    /// from values the store already returns sorted.
    async fn series_in_memory(&self, query: &SeriesQuery) -> Result<Vec<SeriesPoint>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {period} AS period, creation_date, value, unit FROM records",
            period = query.unit.period_sql(),
        ));
        push_series_filter(&mut builder, query);
        builder.push(" ORDER BY period, value");

        let rows: Vec<PeriodValue> = builder.build_query_as().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), aggregation = ?query.aggregation, "Reducing series in memory");
        Ok(reduce_periods(rows, query.aggregation))
    }
}

fn push_series_filter(builder: &mut QueryBuilder<'_, Sqlite>, query: &SeriesQuery) {
    builder
        .push(" WHERE creation_date IS NOT NULL AND type = ")
        .push_bind(query.record_type.clone());

    if let Some(from) = query.from {
        builder
            .push(" AND substr(creation_date, 1, 10) >= ")
            .push_bind(from.format("%Y-%m-%d").to_string());
    }
    if let Some(to) = query.to {
        builder
            .push(" AND substr(creation_date, 1, 10) <= ")
            .push_bind(to.format("%Y-%m-%d").to_string());
    }
}

/// Collapse rows ordered by period then value into one point per period.
fn reduce_periods(rows: Vec<PeriodValue>, aggregation: Aggregation) -> Vec<SeriesPoint> {
    let mut points = Vec::new();
    let mut rows = rows.into_iter().peekable();

    while let Some(first) = rows.next() {
        let period = first.period;
        let mut timestamp = first.creation_date;
        let mut unit = first.unit;
        let mut values = vec![first.value];

        while let Some(row) = rows.next_if(|row| row.period == period) {
            if row.creation_date < timestamp {
                timestamp = row.creation_date;
            }
            unit = match (unit, row.unit) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            values.push(row.value);
        }

        let value = match aggregation {
            Aggregation::Mode => mode(&values),
            _ => median(&values),
        };
        points.push(SeriesPoint {
            period,
            timestamp: Some(timestamp),
            value,
            unit,
        });
    }
    points
}

/// Middle of sorted values, averaging the two middles for even counts
fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Most frequent of sorted values; ties go to the smallest
fn mode(sorted: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    for run in sorted.chunk_by(|a, b| a == b) {
        if best.map_or(true, |(_, count)| run.len() > count) {
            best = Some((run[0], run.len()));
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (HealthDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let db = HealthDb::open(&config).await.unwrap();
        (db, tmp)
    }

    fn record(id: &str, record_type: &str, value: f64, start: &str) -> HealthRecord {
        HealthRecord {
            id: id.to_string(),
            record_type: record_type.to_string(),
            source_name: Some("Watch".to_string()),
            source_version: Some("10.1".to_string()),
            device: None,
            unit: Some("count".to_string()),
            value,
            creation_date: Some(start.to_string()),
            start_date: Some(start.to_string()),
            end_date: Some(start.to_string()),
            metadata: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let (db, _tmp) = setup_test_db().await;
        assert!(db.is_initialized().await.unwrap());
        // schema creation is repeatable
        db.init_schema().await.unwrap();
        assert_eq!(db.stats().await.unwrap(), StoreStats::default());
        db.close().await;
    }

    #[tokio::test]
    async fn test_import_run_lifecycle() {
        let (db, _tmp) = setup_test_db().await;

        let run = db.start_import_run("/tmp/export.xml").await.unwrap();
        assert_eq!(run.get_status().unwrap(), RunStatus::Running);

        let totals = RunTotals {
            chunks: 3,
            records_parsed: 10,
            records_inserted: 9,
            records_duplicate: 1,
            failed_batches: 0,
        };
        db.complete_import_run(&run.id, RunStatus::Completed, totals, None)
            .await
            .unwrap();

        let loaded = db.get_import_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.get_status().unwrap(), RunStatus::Completed);
        assert_eq!(loaded.records_inserted, 9);
        assert!(loaded.completed_at.is_some());
        assert!(loaded.errors().is_empty());

        let latest = db.latest_import_run().await.unwrap().unwrap();
        assert_eq!(latest.id, run.id);
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let (db, _tmp) = setup_test_db().await;

        let mut heart = record("a-1", "HeartRate", 72.0, "2024-01-15T10:00:00+00:00");
        heart.device = Some("Watch".to_string());
        heart.metadata.push(MetadataEntry::new("HKTimeZone", "UTC"));
        let batch = vec![
            heart,
            record("b-2", "HeartRate", 80.0, "2024-01-16T10:00:00+00:00"),
            record("c-3", "StepCount", 500.0, "2024-01-14T10:00:00+00:00"),
        ];
        db.ingest_batch(batch).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_types, 2);
        assert_eq!(stats.total_devices, 1);
        assert_eq!(stats.total_metadata, 1);
        assert_eq!(stats.first_start_date.as_deref(), Some("2024-01-14T10:00:00+00:00"));

        let page = db
            .list_records(&RecordQuery {
                record_type: Some("HeartRate".to_string()),
                page: 0,
                page_size: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.page_count(), 1);
        assert_eq!(page.records[0].id, "b-2");
        assert_eq!(page.records[1].metadata, vec![MetadataEntry::new("HKTimeZone", "UTC")]);

        let second = db
            .list_records(&RecordQuery {
                record_type: None,
                page: 1,
                page_size: 2,
            })
            .await
            .unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].id, "c-3");

        let types = db.list_types().await.unwrap();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].record_type, "HeartRate");
        assert_eq!(types[0].count, 2);
    }

    #[tokio::test]
    async fn test_series() {
        let (db, _tmp) = setup_test_db().await;
        let batch = vec![
            record("a", "StepCount", 100.0, "2024-01-15T08:00:00+05:30"),
            record("b", "StepCount", 50.0, "2024-01-15T20:00:00+05:30"),
            record("c", "StepCount", 10.0, "2024-02-01T08:00:00+05:30"),
            record("d", "HeartRate", 60.0, "2024-01-15T08:00:00+05:30"),
        ];
        db.ingest_batch(batch).await.unwrap();

        let daily = db
            .series(&SeriesQuery {
                record_type: "StepCount".to_string(),
                unit: TimeUnit::Day,
                aggregation: Aggregation::Sum,
                from: None,
                to: None,
            })
            .await
            .unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].period, "2024-01-15");
        assert_eq!(daily[0].value, Some(150.0));
        assert_eq!(daily[0].timestamp.as_deref(), Some("2024-01-15T08:00:00+05:30"));

        let monthly = db
            .series(&SeriesQuery {
                record_type: "StepCount".to_string(),
                unit: TimeUnit::Month,
                aggregation: Aggregation::Count,
                from: NaiveDate::from_ymd_opt(2024, 1, 20),
                to: None,
            })
            .await
            .unwrap();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].period, "2024-02");
        assert_eq!(monthly[0].value, Some(1.0));
    }

    fn step_query(unit: TimeUnit, aggregation: Aggregation) -> SeriesQuery {
        SeriesQuery {
            record_type: "StepCount".to_string(),
            unit,
            aggregation,
            from: None,
            to: None,
        }
    }

    #[tokio::test]
    async fn test_series_by_quarter() {
        let (db, _tmp) = setup_test_db().await;
        let batch = vec![
            record("a", "StepCount", 1.0, "2024-01-31T23:00:00-05:00"),
            record("b", "StepCount", 2.0, "2024-03-01T08:00:00-05:00"),
            record("c", "StepCount", 4.0, "2024-04-01T08:00:00-05:00"),
            record("d", "StepCount", 8.0, "2024-12-31T08:00:00-05:00"),
        ];
        db.ingest_batch(batch).await.unwrap();

        let points = db
            .series(&step_query(TimeUnit::Quarter, Aggregation::Sum))
            .await
            .unwrap();
        let periods: Vec<_> = points.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-Q1", "2024-Q2", "2024-Q4"]);
        assert_eq!(points[0].value, Some(3.0));
        assert_eq!(points[0].timestamp.as_deref(), Some("2024-01-31T23:00:00-05:00"));
        assert_eq!(points[2].value, Some(8.0));
    }

    #[tokio::test]
    async fn test_series_spread() {
        let (db, _tmp) = setup_test_db().await;
        let batch = vec![
            record("a", "StepCount", 2.0, "2024-01-15T08:00:00+00:00"),
            record("b", "StepCount", 4.0, "2024-01-15T09:00:00+00:00"),
            record("c", "StepCount", 7.0, "2024-01-16T08:00:00+00:00"),
        ];
        db.ingest_batch(batch).await.unwrap();

        let variance = db
            .series(&step_query(TimeUnit::Day, Aggregation::Variance))
            .await
            .unwrap();
        assert_eq!(variance[0].value, Some(2.0));
        // a single value has no sample variance
        assert_eq!(variance[1].value, None);

        let stddev = db
            .series(&step_query(TimeUnit::Day, Aggregation::Stddev))
            .await
            .unwrap();
        assert_eq!(stddev[0].value, Some(2f64.sqrt()));
        assert_eq!(stddev[1].value, None);
    }

    #[tokio::test]
    async fn test_series_median_and_mode() {
        let (db, _tmp) = setup_test_db().await;
        let batch = vec![
            record("a", "StepCount", 9.0, "2024-01-15T08:00:00+00:00"),
            record("b", "StepCount", 1.0, "2024-01-15T09:00:00+00:00"),
            record("c", "StepCount", 5.0, "2024-01-15T10:00:00+00:00"),
            record("d", "StepCount", 3.0, "2024-02-01T08:00:00+00:00"),
            record("e", "StepCount", 3.0, "2024-02-02T08:00:00+00:00"),
            record("f", "StepCount", 6.0, "2024-02-03T08:00:00+00:00"),
            record("g", "StepCount", 10.0, "2024-02-04T08:00:00+00:00"),
            record("h", "HeartRate", 70.0, "2024-02-04T08:00:00+00:00"),
        ];
        db.ingest_batch(batch).await.unwrap();

        let median = db
            .series(&step_query(TimeUnit::Month, Aggregation::Median))
            .await
            .unwrap();
        assert_eq!(median.len(), 2);
        assert_eq!(median[0].period, "2024-01");
        assert_eq!(median[0].value, Some(5.0));
        assert_eq!(median[0].timestamp.as_deref(), Some("2024-01-15T08:00:00+00:00"));
        assert_eq!(median[0].unit.as_deref(), Some("count"));
        // even count averages the two middle values
        assert_eq!(median[1].value, Some(4.5));

        let mode = db
            .series(&step_query(TimeUnit::Month, Aggregation::Mode))
            .await
            .unwrap();
        // no repeats in January, so the smallest value wins
        assert_eq!(mode[0].value, Some(1.0));
        assert_eq!(mode[1].value, Some(3.0));
    }

    #[test]
    fn test_mode_prefers_most_frequent() {
        assert_eq!(mode(&[1.0, 2.0, 2.0, 3.0, 3.0, 3.0]), Some(3.0));
        assert_eq!(mode(&[1.0, 1.0, 2.0, 2.0]), Some(1.0));
        assert_eq!(mode(&[]), None);
        assert_eq!(median(&[]), None);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (db, _tmp) = setup_test_db().await;
        let mut r = record("a-1", "HeartRate", 72.0, "2024-01-15T10:00:00+00:00");
        r.metadata.push(MetadataEntry::new("k", "v"));
        db.ingest_batch(vec![r]).await.unwrap();
        db.start_import_run("/tmp/export.xml").await.unwrap();

        db.reset().await.unwrap();

        assert_eq!(db.stats().await.unwrap(), StoreStats::default());
        assert!(db.latest_import_run().await.unwrap().is_none());
        assert!(db.is_initialized().await.unwrap());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("month".parse::<TimeUnit>().unwrap(), TimeUnit::Month);
        assert_eq!("AVG".parse::<Aggregation>().unwrap(), Aggregation::Avg);
        assert!("week".parse::<TimeUnit>().is_err());
        assert_eq!("quarter".parse::<TimeUnit>().unwrap(), TimeUnit::Quarter);
        assert_eq!("std".parse::<Aggregation>().unwrap(), Aggregation::Stddev);
        assert_eq!("median".parse::<Aggregation>().unwrap(), Aggregation::Median);
        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
    }
}
