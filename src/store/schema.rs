//! SQLite schema definition

/// Records and their metadata. Column layout is part of the stored format.
pub const SCHEMA_SQL: &str = r#"
-- Records: one health observation each
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    source_name TEXT,
    source_version TEXT,
    device TEXT,
    unit TEXT,
    value REAL NOT NULL,
    creation_date TIMESTAMP,
    start_date TIMESTAMP,
    end_date TIMESTAMP
);

-- Record metadata: key/value annotations owned by a record
CREATE TABLE IF NOT EXISTS record_metadata (
    record_id TEXT REFERENCES records(id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (record_id, key)
);

-- Import runs: history of file imports
CREATE TABLE IF NOT EXISTS import_runs (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    chunks INTEGER DEFAULT 0,
    records_parsed INTEGER DEFAULT 0,
    records_inserted INTEGER DEFAULT 0,
    records_duplicate INTEGER DEFAULT 0,
    failed_batches INTEGER DEFAULT 0,
    errors_json TEXT
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_records_type ON records(type);
CREATE INDEX IF NOT EXISTS idx_records_dates ON records(start_date, end_date);
CREATE INDEX IF NOT EXISTS idx_metadata_key ON record_metadata(key);
"#;

/// Drops every table, metadata first so no row outlives its record.
pub const DROP_SQL: &str = r#"
DROP TABLE IF EXISTS record_metadata;
DROP TABLE IF EXISTS records;
DROP TABLE IF EXISTS import_runs;
"#;
