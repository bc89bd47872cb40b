//! Collector Service - Extracts health indicators into per-source staging tables
//!
//! Responsibilities:
//! - Fetch OECD SDMX cubes, trying fallback (unit, category) combinations
//! - Decode sparse SDMX observations into flat country/year records
//! - Fetch WHO GHO and World Bank indicators
//! - Normalize every source to (country, year, indicator, value), averaging duplicates
//! - Upsert each source into its staging table
//! - Track every step in the run log
//!
//! Usage:
//!   # All sources:
//!   cargo run --bin collector
//!
//!   # Selected sources, correlated with a later integrator run:
//!   cargo run --bin collector -- --source sdmx --source who --run-id <uuid>
//!
//!   # Extract and normalize only:
//!   cargo run --bin collector -- --dry-run

mod cube;
mod decoder;
mod normalize;
mod planner;
mod sdmx;
mod staging;
mod transport;
mod who;
mod world_bank;

use anyhow::{Context, Result};
use clap::Parser;
use shared::db::connect;
use shared::runlog::{tracked, RunLog};
use shared::{Config, FlatRecord, Source};
use sqlx::PgPool;
use uuid::Uuid;

use crate::sdmx::{SdmxExtractor, SDMX_CATALOG};
use crate::staging::StagingWriter;
use crate::transport::{HttpTransport, JsonTransport};
use crate::who::{WhoExtractor, WHO_INDICATORS};
use crate::world_bank::{WorldBankExtractor, WB_INDICATORS};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Extracts health indicators into staging tables")]
struct Args {
    /// Source to collect: sdmx, worldbank or who (repeatable; default all)
    #[arg(long = "source", value_name = "SOURCE")]
    sources: Vec<Source>,

    /// Run id shared with the integrator in the run log
    #[arg(long)]
    run_id: Option<Uuid>,

    /// Dry run - extract and normalize, write nothing
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[derive(Debug, Default)]
struct SourceSummary {
    extracted: usize,
    normalized: usize,
    staged: u64,
}

/// Requested sources in order, without repeats.
fn selected_sources(requested: &[Source]) -> Vec<Source> {
    if requested.is_empty() {
        return Source::ALL.to_vec();
    }
    let mut out = Vec::new();
    for source in requested {
        if !out.contains(source) {
            out.push(*source);
        }
    }
    out
}

async fn extract(source: Source, config: &Config, transport: &dyn JsonTransport) -> Vec<FlatRecord> {
    match source {
        Source::Sdmx => {
            SdmxExtractor::new(
                transport,
                &config.sdmx_base_url,
                &config.countries,
                config.http_timeout,
            )
            .extract_all(SDMX_CATALOG)
            .await
        }
        Source::WorldBank => {
            WorldBankExtractor::new(transport, &config.wb_base_url, &config.countries)
                .extract_all(WB_INDICATORS)
                .await
        }
        Source::Who => {
            WhoExtractor::new(transport, &config.gho_base_url, &config.countries)
                .extract_all(WHO_INDICATORS)
                .await
        }
    }
}

/// Extract, normalize and stage one source, one run-log step each.
async fn collect_source(
    source: Source,
    config: &Config,
    transport: &dyn JsonTransport,
    pool: Option<&PgPool>,
    run_log: Option<&RunLog>,
) -> Result<SourceSummary> {
    let raw = tracked(
        run_log,
        &format!("extract_{}", source),
        None,
        |rows: &Vec<FlatRecord>| rows.len() as i64,
        async { Ok(extract(source, config, transport).await) },
    )
    .await?;
    let extracted = raw.len();

    let records = tracked(
        run_log,
        &format!("transform_{}", source),
        Some(extracted as i64),
        |rows: &Vec<FlatRecord>| rows.len() as i64,
        async { Ok(normalize::finalize(raw, config.year_min)) },
    )
    .await?;

    let staged = tracked(
        run_log,
        &format!("load_{}", source),
        Some(records.len() as i64),
        |written: &u64| *written as i64,
        async {
            match pool {
                Some(pool) => StagingWriter::new(pool, &config.staging_schema)
                    .load(source, &records)
                    .await
                    .with_context(|| format!("Failed to stage {} rows", source)),
                None => {
                    println!("  Dry run - would stage {} rows", records.len());
                    Ok(0)
                }
            }
        },
    )
    .await?;

    Ok(SourceSummary {
        extracted,
        normalized: records.len(),
        staged,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    shared::telemetry::init_tracing();
    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let run_id = args.run_id.unwrap_or_else(Uuid::new_v4);
    let sources = selected_sources(&args.sources);

    println!("=== Health Indicators Collector ===");
    println!("Run: {}", run_id);
    println!("Countries: {}", config.countries.len());
    println!(
        "Sources: {}",
        sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    );

    let transport =
        HttpTransport::new(config.http_timeout).context("Failed to build HTTP client")?;

    let pool = if args.dry_run {
        println!("Dry run - staging and run log are not written");
        None
    } else {
        Some(
            connect(&config.db_url)
                .await
                .context("Failed to connect to database")?,
        )
    };

    let run_log = match &pool {
        Some(pool) => {
            let log = RunLog::new(pool.clone(), config.staging_schema.as_str(), run_id);
            log.ensure_table()
                .await
                .context("Failed to prepare run_log table")?;
            Some(log)
        }
        None => None,
    };

    let mut summaries = Vec::with_capacity(sources.len());
    for source in sources {
        println!("\n[{}] {}", source, source.staging_table());
        let summary = collect_source(source, &config, &transport, pool.as_ref(), run_log.as_ref())
            .await
            .with_context(|| format!("Collection of {} failed", source))?;
        println!(
            "  ✓ extracted {} / normalized {} / staged {}",
            summary.extracted, summary.normalized, summary.staged
        );
        summaries.push((source, summary));
    }

    println!("\n=== Collection Summary ===");
    for (source, summary) in &summaries {
        println!("{:<10} {:>8} rows", source.as_str(), summary.normalized);
    }
    println!(
        "Ready for integration: cargo run --bin integrator -- --run-id {}",
        run_id
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sources_are_all() {
        assert_eq!(selected_sources(&[]), Source::ALL.to_vec());
    }

    #[test]
    fn test_selected_sources_keep_order_without_repeats() {
        assert_eq!(
            selected_sources(&[Source::Who, Source::Sdmx, Source::Who]),
            vec![Source::Who, Source::Sdmx]
        );
    }

    #[test]
    fn test_args_parse_repeated_sources() {
        let args = Args::try_parse_from([
            "collector",
            "--source",
            "who",
            "--source",
            "oecd",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.sources, vec![Source::Who, Source::Sdmx]);
        assert!(args.dry_run);
        assert!(args.run_id.is_none());
    }

    #[test]
    fn test_args_reject_unknown_source() {
        assert!(Args::try_parse_from(["collector", "--source", "eurostat"]).is_err());
    }
}
