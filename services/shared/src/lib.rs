//! Shared building blocks for the health indicators pipeline
//!
//! Used by both services:
//! - `collector` extracts, normalizes and stages per-source records
//! - `integrator` merges staging into the mart by source priority
//!
//! Holds the canonical record types, the country dictionary, environment
//! configuration, database connection helpers and run-log bookkeeping.

pub mod config;
pub mod countries;
pub mod db;
pub mod error;
pub mod record;
pub mod runlog;
pub mod telemetry;

pub use config::Config;
pub use countries::CountryDictionary;
pub use error::ConfigError;
pub use record::{FlatRecord, MergedRecord, RecordKey, Source, SourcePriority};
