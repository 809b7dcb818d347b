// Finance Support - command line
//
// Imports a support-data CSV into SQLite and runs the analytical queries
// against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finance_support::{QueryFacade, SqliteStore, UPLOAD_EVENT};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Institution queried when `extremes` is given no --bank
const DEFAULT_EXTREMES_BANK: &str = "외환은행";

#[derive(Parser, Debug)]
#[command(name = "finance-support", version, about = "Housing finance support analytics")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "FINANCE_DB", default_value = "finance.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an EUC-KR support-data CSV
    Import {
        file: PathBuf,
    },
    /// Show previous imports
    History,
    /// List every institution
    Banks,
    /// Yearly totals per institution
    Statics,
    /// Year and institution with the largest yearly total
    Largest,
    /// Years with the largest and smallest average support
    Extremes {
        #[arg(long, default_value = DEFAULT_EXTREMES_BANK)]
        bank: String,
    },
    /// Forecast next year's support for one month
    Forecast {
        #[arg(long)]
        bank: String,
        #[arg(long)]
        month: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;
    let facade = QueryFacade::new(store);

    if let Err(e) = run(&facade, cli.command) {
        error!("{}", e);
        return Err(e);
    }

    Ok(())
}

fn run(facade: &QueryFacade<SqliteStore>, command: Command) -> Result<()> {
    match command {
        Command::Import { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = facade.ingest(Some(bytes.as_slice()))?;

            println!("✓ Imported {}", file.display());
            println!("  Institutions: {} ({} new)", report.institutions, report.registered);
            println!("  Records:      {} inserted", report.inserted);
            println!("  Duplicates:   {} skipped", report.duplicates);
            println!("✓ Database holds {} records", facade.store().record_count()?);
        }
        Command::History => {
            for event in facade.store().events(UPLOAD_EVENT)? {
                println!(
                    "{}  {}  inserted {}  duplicates {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.entity_id,
                    event.data["inserted"],
                    event.data["duplicates"]
                );
            }
        }
        Command::Banks => {
            let banks = facade.bank_list()?;
            for name in banks.names() {
                println!("{}", name);
            }
        }
        Command::Statics => {
            for yearly in facade.yearly_statics()?.statics {
                println!("{}  total {}", yearly.year, yearly.total_amount);
                for (name, amount) in &yearly.detail_amount {
                    println!("    {:<20} {}", name, amount);
                }
            }
        }
        Command::Largest => {
            let largest = facade.largest_support()?;
            println!("{} {}", largest.year, largest.institution_name);
        }
        Command::Extremes { bank } => {
            let result = facade.extreme_averages(&bank)?;
            println!("{}", result.institution_name);
            println!("  largest:  {} ({})", result.largest_amount, result.largest_year);
            println!("  smallest: {} ({})", result.smallest_amount, result.smallest_year);
        }
        Command::Forecast { bank, month } => {
            let forecast = facade.forecast(&bank, &month)?;
            println!(
                "{} {}-{}: {}",
                bank, forecast.year, forecast.month, forecast.amount
            );
        }
    }

    Ok(())
}
