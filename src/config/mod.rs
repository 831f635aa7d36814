//! Configuration management for health-ingest
//!
//! Handles loading and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::parse::{IdentityScheme, ParserOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Import pipeline configuration
    #[serde(default)]
    pub import: ImportConfig,

    /// Record identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// SQLite configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Bytes per transport chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum concurrent ingestion transactions
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Chunks buffered between reader and parser
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Emit a record left open at end of input
    #[serde(default = "default_flush_unterminated_record")]
    pub flush_unterminated_record: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_scheme")]
    pub scheme: IdentityScheme,
}

/// SQLite configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds a writer waits for the database lock
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for health-ingest data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_in_flight: default_max_in_flight(),
            channel_capacity: default_channel_capacity(),
            flush_unterminated_record: default_flush_unterminated_record(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            scheme: default_identity_scheme(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.health-ingest)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".health-ingest")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Point all paths at a base directory
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("health.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("health.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Parser settings derived from this configuration
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            identity: self.identity.scheme,
            flush_unterminated: self.import.flush_unterminated_record,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.import.chunk_size == 0 {
            return Err(Error::Config("import.chunk_size must be positive".to_string()));
        }

        if self.import.max_in_flight == 0 {
            return Err(Error::Config(
                "import.max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.import.channel_capacity == 0 {
            return Err(Error::Config(
                "import.channel_capacity must be at least 1".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.query.page_size == 0 {
            return Err(Error::Config("query.page_size must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.import.chunk_size, 1024 * 1024);
        assert_eq!(config.identity.scheme, IdentityScheme::Rolling32);
        assert!(!config.import.flush_unterminated_record);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.import.max_in_flight = 8;
        config.identity.scheme = IdentityScheme::Blake3;

        std::fs::create_dir_all(&config.paths.base_dir).unwrap();
        std::fs::write(
            &config.paths.config_file,
            toml::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.import.max_in_flight, 8);
        assert_eq!(loaded.identity.scheme, IdentityScheme::Blake3);
        assert_eq!(loaded.paths.db_file, tmp.path().join("health.db"));
    }

    #[test]
    fn test_rendered_default_config_parses() {
        let config: Config = toml::from_str(&render_default_config()).unwrap();
        assert_eq!(config.import.chunk_size, default_chunk_size());
        assert_eq!(config.database.busy_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[import]\nchunk_size = 4096\n").unwrap();
        assert_eq!(config.import.chunk_size, 4096);
        assert_eq!(config.import.max_in_flight, default_max_in_flight());
        assert_eq!(config.query.page_size, default_page_size());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.import.chunk_size = 0;
        assert!(config.validate().is_err());

        config.import.chunk_size = 512;
        assert!(config.validate().is_ok());

        config.import.max_in_flight = 0;
        assert!(config.validate().is_err());
    }
}
