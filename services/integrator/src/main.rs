//! Integrator Service - Merges staged sources into the country/year fact table
//!
//! Responsibilities:
//! - Build `dim_country` from the country dictionary
//! - Rank staged records by source priority (default sdmx > worldbank > who)
//! - Upsert one row per (country, year, indicator) in a single transaction
//! - Rebuild the `country_year_wide` pivot
//! - Track every step in the run log
//!
//! Usage:
//!   cargo run --bin integrator -- --run-id <uuid from the collector>
//!
//!   # Rank without writing:
//!   cargo run --bin integrator -- --dry-run

mod dim_country;
mod merge;
mod store;
mod wide;

use anyhow::{Context, Result};
use clap::Parser;
use shared::db::connect;
use shared::runlog::{tracked, RunLog};
use shared::Config;
use uuid::Uuid;

use crate::dim_country::build_dim_country;
use crate::merge::{MergeReport, MergeResolver};
use crate::store::PgFactStore;
use crate::wide::build_wide;

#[derive(Parser, Debug)]
#[command(name = "integrator", about = "Merges staged indicators into the mart")]
struct Args {
    /// Run id shared with the collector in the run log
    #[arg(long)]
    run_id: Option<Uuid>,

    /// Drop years before this one (defaults to YEAR_MIN)
    #[arg(long)]
    year_min: Option<i32>,

    /// Do not rebuild country_year_wide
    #[arg(long, default_value = "false")]
    skip_wide: bool,

    /// Dry run - rank and report, write nothing
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn print_report(report: &MergeReport) {
    println!("Collected: {}", report.collected);
    println!("Merged:    {}", report.merged);
    println!("Written:   {}", report.written);
    for (source, rows) in &report.winners {
        println!("  {:<10} {:>8} winning rows", source.as_str(), rows);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    shared::telemetry::init_tracing();
    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let run_id = args.run_id.unwrap_or_else(Uuid::new_v4);
    let year_min = args.year_min.unwrap_or(config.year_min);

    println!("=== Health Indicators Integrator ===");
    println!("Run: {}", run_id);
    println!("Priority: {}", config.source_priority);
    println!("Year min: {}", year_min);

    let pool = connect(&config.db_url)
        .await
        .context("Failed to connect to database")?;
    let store = PgFactStore::new(pool.clone(), &config.staging_schema, &config.mart_schema);
    let resolver = MergeResolver::new(&store, config.source_priority.clone(), year_min);

    if args.dry_run {
        println!("Dry run - mart and run log are not written");
        let (_, report) = resolver.preview().await.context("Merge preview failed")?;
        print_report(&report);
        return Ok(());
    }

    let run_log = RunLog::new(pool.clone(), config.staging_schema.as_str(), run_id);
    run_log
        .ensure_table()
        .await
        .context("Failed to prepare run_log table")?;

    println!("\n[dim_country]");
    let countries = tracked(
        Some(&run_log),
        "integration_dim_country",
        Some(config.countries.len() as i64),
        |rows: &u64| *rows as i64,
        async {
            build_dim_country(&pool, &config.mart_schema, &config.countries)
                .await
                .context("Failed to build dim_country")
        },
    )
    .await?;
    println!("  ✓ {} countries", countries);

    println!("\n[country_year_indicators]");
    let staged = store
        .staged_rows()
        .await
        .context("Failed to count staging rows")?;
    println!("Staged rows: {}", staged);
    let report = tracked(
        Some(&run_log),
        "integration_long",
        Some(staged),
        |report: &MergeReport| report.written as i64,
        async {
            store
                .ensure_mart()
                .await
                .context("Failed to prepare mart table")?;
            resolver.run().await.context("Merge failed, mart left unchanged")
        },
    )
    .await?;
    print_report(&report);

    if args.skip_wide {
        println!("\n[country_year_wide] skipped");
    } else {
        println!("\n[country_year_wide]");
        let rows = tracked(
            Some(&run_log),
            "integration_wide_sql",
            Some(report.merged as i64),
            |rows: &i64| *rows,
            async {
                build_wide(&pool, &config.mart_schema)
                    .await
                    .context("Failed to rebuild country_year_wide")
            },
        )
        .await?;
        println!("  ✓ {} rows", rows);
    }

    println!("\n=== Integration Complete ===");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["integrator"]).unwrap();
        assert!(args.run_id.is_none());
        assert!(args.year_min.is_none());
        assert!(!args.skip_wide);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_args_flags() {
        let args = Args::try_parse_from([
            "integrator",
            "--run-id",
            "6f1c2b1e-4d0a-4c55-9a57-0b7d2f6c9e11",
            "--year-min",
            "2000",
            "--skip-wide",
        ])
        .unwrap();
        assert_eq!(args.year_min, Some(2000));
        assert!(args.skip_wide);
        assert_eq!(
            args.run_id.map(|id| id.to_string()).as_deref(),
            Some("6f1c2b1e-4d0a-4c55-9a57-0b7d2f6c9e11")
        );
    }
}
