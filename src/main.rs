//! health-ingest CLI entry point

use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use health_ingest::{
    commands::{
        cmd_import, cmd_init, cmd_query, cmd_records, cmd_reset, cmd_series, cmd_status,
        cmd_types, print_import_summary, print_init_report, print_query, print_records,
        print_series, print_status, print_types, schema_sql, ImportOverrides, InitOptions,
    },
    config::Config,
    error::{Error, Result},
    progress::LogWriterFactory,
    store::{Aggregation, HealthDb, SeriesQuery, TimeUnit},
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "health-ingest")]
#[command(version, about = "Stream health-data XML exports into a local SQLite store", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Import a health export file
    Import {
        /// Path to the export XML
        file: PathBuf,

        /// Bytes per chunk (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Concurrent ingestion transactions (overrides config)
        #[arg(long)]
        max_in_flight: Option<usize>,
    },

    /// Show storage statistics and the last import
    Status,

    /// List stored records, newest first
    Records {
        /// Only records of this type
        #[arg(short = 't', long = "type")]
        record_type: Option<String>,

        /// Page number, starting at 0
        #[arg(short, long, default_value = "0")]
        page: u32,

        /// Records per page (defaults to config)
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// List record types with counts
    Types,

    /// Aggregate one record type over time
    Series {
        /// Record type to aggregate
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// Period: day, month, quarter, or year
        #[arg(short, long, default_value = "day")]
        unit: TimeUnit,

        /// Aggregation: sum, avg, min, max, count, stddev, variance, median, or mode
        #[arg(short, long = "agg", default_value = "sum")]
        aggregation: Aggregation,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Run an SQL statement against the store
    Query {
        /// Statement to run
        #[arg(required_unless_present = "schema")]
        sql: Option<String>,

        /// Print the store schema instead
        #[arg(long, conflicts_with = "sql")]
        schema: bool,
    },

    /// Delete all stored records, metadata, and import history
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        return handle_init(cli.config, force, cli.json).await;
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "health-ingest", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let db = HealthDb::open(&config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Import {
            file,
            chunk_size,
            max_in_flight,
        } => {
            let overrides = ImportOverrides {
                chunk_size,
                max_in_flight,
            };
            let report = cmd_import(&config, &db, &file, overrides, !cli.json).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_import_summary(&report);
            }
        }

        Commands::Status => {
            let status = cmd_status(&config, &db).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Records {
            record_type,
            page,
            page_size,
        } => {
            let records = cmd_records(&config, &db, record_type, page, page_size).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_records(&records);
            }
        }

        Commands::Types => {
            let types = cmd_types(&db).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&types)?);
            } else {
                print_types(&types);
            }
        }

        Commands::Series {
            record_type,
            unit,
            aggregation,
            from,
            to,
        } => {
            let query = SeriesQuery {
                record_type,
                unit,
                aggregation,
                from,
                to,
            };
            let points = cmd_series(&db, &query).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else {
                print_series(&points);
            }
        }

        Commands::Query { sql, schema } => match sql {
            Some(sql) if !schema => {
                let output = cmd_query(&db, &sql).await?;

                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&output)?);
                } else {
                    print_query(&output);
                }
            }
            _ => {
                if cli.json {
                    let schema = serde_json::json!({ "schema": schema_sql() });
                    println!("{}", serde_json::to_string_pretty(&schema)?);
                } else {
                    println!("{}", schema_sql());
                }
            }
        },

        Commands::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL imported health data!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }
            let removed = cmd_reset(&db).await?;
            if cli.json {
                println!(r#"{{"status": "ok", "records_removed": {}}}"#, removed.total_records);
            } else {
                println!(
                    "✓ Storage reset ({} records removed, schema recreated)",
                    removed.total_records
                );
            }
        }
    }

    db.close().await;
    Ok(())
}

async fn handle_init(config: Option<PathBuf>, force: bool, json: bool) -> Result<()> {
    // A .toml path names the config file; anything else is a base directory
    let (base_dir, config_path) = match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    };

    let report = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_init_report(&report);
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
