//! Record listing, type, and series commands

use crate::config::Config;
use crate::error::Result;
use crate::store::{HealthDb, RecordPage, RecordQuery, SeriesPoint, SeriesQuery, TypeCount};
use tracing::info;

pub async fn cmd_records(
    config: &Config,
    db: &HealthDb,
    record_type: Option<String>,
    page: u32,
    page_size: Option<u32>,
) -> Result<RecordPage> {
    let query = RecordQuery {
        record_type,
        page,
        page_size: page_size.unwrap_or(config.query.page_size).max(1),
    };
    info!(page = query.page, page_size = query.page_size, "Listing records");
    db.list_records(&query).await
}

pub async fn cmd_types(db: &HealthDb) -> Result<Vec<TypeCount>> {
    db.list_types().await
}

pub async fn cmd_series(db: &HealthDb, query: &SeriesQuery) -> Result<Vec<SeriesPoint>> {
    info!(
        record_type = %query.record_type,
        unit = ?query.unit,
        aggregation = ?query.aggregation,
        "Building series"
    );
    db.series(query).await
}

pub fn print_records(page: &RecordPage) {
    if page.records.is_empty() {
        println!("No records found.");
        return;
    }

    println!(
        "\n📋 Records (page {} of {}, {} total)\n",
        page.page + 1,
        page.page_count(),
        page.total
    );

    for record in &page.records {
        let unit = record.unit.as_deref().unwrap_or("");
        println!("• {} = {} {}", record.record_type, record.value, unit);
        println!("  ID: {}", record.id);
        if let (Some(start), Some(end)) = (&record.start_date, &record.end_date) {
            println!("  When: {} → {}", start, end);
        }
        if let Some(source) = &record.source_name {
            match &record.source_version {
                Some(version) => println!("  Source: {} ({})", source, version),
                None => println!("  Source: {}", source),
            }
        }
        for entry in &record.metadata {
            println!("  {} = {}", entry.key, entry.value);
        }
        println!();
    }
}

pub fn print_types(types: &[TypeCount]) {
    if types.is_empty() {
        println!("No records stored yet.");
        return;
    }

    let width = types.iter().map(|t| t.record_type.len()).max().unwrap_or(0);
    for t in types {
        println!("{:<width$}  {}", t.record_type, t.count, width = width);
    }
}

pub fn print_series(points: &[SeriesPoint]) {
    if points.is_empty() {
        println!("No data in range.");
        return;
    }

    for point in points {
        let value = point
            .value
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10}  {:>12} {}",
            point.period,
            value,
            point.unit.as_deref().unwrap_or("")
        );
    }
}
