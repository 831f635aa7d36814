//! health-ingest - streaming importer for health-data XML exports
//!
//! This crate provides:
//! - A chunked file transport with bounded backpressure
//! - A resumable line-oriented parser producing deterministic record ids
//! - Transactional, idempotent bulk ingestion into SQLite
//! - Progress aggregation and a CLI for importing and querying the store

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
