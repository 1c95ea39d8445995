//! counter-ingest - Main entry point

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use counter_common::logging::{init_logging, LogConfig, LogLevel};
use counter_ingest::db::{create_pool, PgUsageStore};
use counter_ingest::fallback::{FallbackPayload, FallbackPersistence};
use counter_ingest::sequencer::{PrimaryKeySequencer, Relation};
use counter_ingest::storage::S3ObjectStore;
use counter_ingest::sushi::{RawUsageDocument, UsageReportConverter};
use counter_ingest::{IngestConfig, IngestOutcome, IngestionCoordinator, SushiReportRequest};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "counter-ingest")]
#[command(author, version, about = "Convert and load COUNTER R5 usage reports", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert a report to flat usage records and print them as JSON
    Convert {
        /// COUNTER R5 JSON report
        file: PathBuf,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Convert, deduplicate and load a harvested report
    Ingest {
        /// COUNTER R5 JSON report
        file: PathBuf,

        /// Statistics source the report was harvested from
        #[arg(long)]
        source_id: i64,

        /// Report type code, e.g. TR or DR
        #[arg(long)]
        report_type: String,

        /// First day of the requested range (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        begin: NaiveDate,

        /// Last day of the requested range (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        end: NaiveDate,
    },

    /// Save a non-COUNTER usage file to object storage
    UploadNonstandard {
        file: PathBuf,

        #[arg(long)]
        source_id: i64,

        #[arg(long)]
        fiscal_year_id: i64,
    },

    /// Print the next free primary key of a relation
    NextKey {
        /// Relation name, e.g. counter_data or fiscal_years
        relation: Relation,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    counter_common::error::parse_iso_date(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder().level(level).build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        }
    };

    if let Err(e) = run(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    let config = IngestConfig::load()?;

    match command {
        Commands::Convert { file, pretty } => {
            let document = read_document(&file).await?;
            let converter = UsageReportConverter::new(config.field_lengths.clone())?;
            let report = converter.convert(&document)?;
            info!(
                records = report.records.len(),
                populated = ?report.populated_fields,
                "Conversion finished"
            );

            let json = if pretty {
                serde_json::to_string_pretty(&report.records)?
            } else {
                serde_json::to_string(&report.records)?
            };
            println!("{}", json);
        }

        Commands::Ingest {
            file,
            source_id,
            report_type,
            begin,
            end,
        } => {
            let request = SushiReportRequest::new(source_id, report_type, begin, end)?;
            let coordinator = build_coordinator(&config)?;

            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let outcome = match RawUsageDocument::from_json_str(&raw) {
                Ok(document) => coordinator.ingest_sushi_report(&request, &document).await?,
                Err(e) => {
                    let reason = format!("not a COUNTER R5 JSON report: {}", e);
                    coordinator.save_unreadable_report(&request, &raw, &reason).await?
                }
            };
            print_outcome(&outcome);
        }

        Commands::UploadNonstandard {
            file,
            source_id,
            fiscal_year_id,
        } => {
            let coordinator = build_coordinator(&config)?;
            let payload = FallbackPayload::from_file(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let location = coordinator
                .store_nonstandard_usage(source_id, fiscal_year_id, &payload)
                .await?;
            println!("Saved {} to {}", file.display(), location);
        }

        Commands::NextKey { relation } => {
            let pool = create_pool(&config.database)?;
            let sequencer = PrimaryKeySequencer::new(Arc::new(PgUsageStore::new(pool)));
            println!("{}", sequencer.next_key(relation).await?);
        }
    }

    Ok(())
}

fn build_coordinator(config: &IngestConfig) -> anyhow::Result<IngestionCoordinator> {
    let pool = create_pool(&config.database)?;
    let store = Arc::new(PgUsageStore::new(pool));
    let objects = Arc::new(S3ObjectStore::new(&config.storage));
    let fallback = FallbackPersistence::new(objects).with_prefix(config.fallback_prefix.clone());
    let converter = UsageReportConverter::new(config.field_lengths.clone())?;

    Ok(IngestionCoordinator::new(converter, store, fallback).with_probe_strategy(config.probe_strategy))
}

async fn read_document(path: &Path) -> anyhow::Result<RawUsageDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    RawUsageDocument::from_slice(&bytes)
        .with_context(|| format!("{} is not a COUNTER R5 JSON report", path.display()))
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Loaded {
            records,
            first_key,
            duplicates,
            populated_fields,
        } => {
            println!("Loaded {} usage records starting at key {}", records, first_key);
            let columns: Vec<&str> = populated_fields.iter().copied().collect();
            println!("Columns with data: {}", columns.join(", "));
            if let Some(report) = duplicates {
                println!("{}", report);
            }
        }
        IngestOutcome::AllDuplicates { report } => println!("{}", report),
        IngestOutcome::NoUsage => println!("The report contains no usage"),
        IngestOutcome::SavedToFallback {
            stage,
            reason,
            location,
        } => {
            println!("Ingestion failed during {}: {}", stage, reason);
            println!("The raw report was saved to {}", location);
        }
    }
}
