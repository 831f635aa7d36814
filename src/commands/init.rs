//! Init command implementation

use crate::config::{render_default_config, Config};
use crate::error::{Error, Result};
use crate::store::HealthDb;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub base_dir: String,
    pub config_path: String,
    pub db_path: String,
}

/// Write the default configuration and create the database schema
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, render_default_config())?;
    info!("Created config at {:?}", config_path);

    let config = Config::load(&config_path)?;
    let db = HealthDb::open(&config).await?;
    db.init_schema().await?;
    db.close().await;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(InitReport {
        base_dir: base_dir.display().to_string(),
        config_path: config_path.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
    })
}

pub fn print_init_report(report: &InitReport) {
    println!("✓ Initialized health-ingest at {}", report.base_dir);
    println!("\nConfiguration: {}", report.config_path);
    println!("Database: {}", report.db_path);
    println!("\nNext steps:");
    println!("  health-ingest import export.xml        # Load a health export");
    println!("  health-ingest status                   # Inspect what was stored");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_config_and_schema() {
        let tmp = TempDir::new().unwrap();
        let options = InitOptions {
            base_dir: tmp.path().to_path_buf(),
            config_path: tmp.path().join("config.toml"),
            force: false,
        };

        let report = cmd_init(options.clone()).await.unwrap();
        assert!(tmp.path().join("config.toml").exists());
        assert!(report.db_path.ends_with("health.db"));

        let config = Config::load(&options.config_path).unwrap();
        let db = HealthDb::open(&config).await.unwrap();
        assert!(db.is_initialized().await.unwrap());

        // refuses to clobber without --force
        assert!(cmd_init(options.clone()).await.is_err());
        let forced = InitOptions { force: true, ..options };
        assert!(cmd_init(forced).await.is_ok());
    }
}
