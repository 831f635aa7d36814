//! Reset command implementation

use crate::error::Result;
use crate::store::{HealthDb, StoreStats};
use tracing::info;

/// Drop all stored data, returning what was removed
pub async fn cmd_reset(db: &HealthDb) -> Result<StoreStats> {
    let before = db.stats().await?;
    db.reset().await?;
    info!(records = before.total_records, "Storage reset");
    Ok(before)
}
