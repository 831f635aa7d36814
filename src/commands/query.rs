//! SQL console command

use crate::error::Result;
use crate::store::{HealthDb, QueryOutput, SCHEMA_SQL};
use serde_json::Value;
use tracing::info;

pub async fn cmd_query(db: &HealthDb, sql: &str) -> Result<QueryOutput> {
    info!(sql = %sql.trim(), "Running query");
    db.query_json(sql).await
}

/// DDL the store is created with
pub fn schema_sql() -> &'static str {
    SCHEMA_SQL.trim()
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lay query rows out as a left-aligned text table
fn render_table(output: &QueryOutput) -> String {
    let cells: Vec<Vec<String>> = output
        .rows
        .iter()
        .map(|row| row.iter().map(render_cell).collect())
        .collect();

    let mut widths: Vec<usize> = output.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |row: &[String]| {
        row.iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut table = vec![line(&output.columns)];
    table.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    table.extend(cells.iter().map(|row| line(row)));
    table.join("\n")
}

pub fn print_query(output: &QueryOutput) {
    if output.rows.is_empty() {
        println!("(no rows)");
        return;
    }

    println!("{}", render_table(output));
    println!(
        "({} row{})",
        output.rows.len(),
        if output.rows.len() == 1 { "" } else { "s" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_table_aligns_columns() {
        let output = QueryOutput {
            columns: vec!["type".to_string(), "n".to_string()],
            rows: vec![
                vec![json!("HeartRate"), json!(12)],
                vec![json!("Steps"), Value::Null],
            ],
        };

        let table = render_table(&output);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "type      | n");
        assert_eq!(lines[1], "----------+-----");
        assert_eq!(lines[2], "HeartRate | 12");
        assert_eq!(lines[3], "Steps     | NULL");
    }

    #[test]
    fn test_schema_sql_names_tables() {
        let schema = schema_sql();
        assert!(schema.contains("CREATE TABLE IF NOT EXISTS records"));
        assert!(schema.contains("record_metadata"));
    }
}
