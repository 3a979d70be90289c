mod catalog;
mod cli;
mod config;
mod download;
mod error;
mod grid;
mod parquet;
mod reading;
mod reconcile;
mod reduce;
mod source;
mod spatial;
mod store;
mod tile;

use std::io;

use anyhow::{bail, Error, Result};
use clap::Parser;
use cli::{command, Cli, Commands};
use config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load(&cli.config)?;

    match &cli.command {
        Commands::Run {
            variable,
            start,
            end,
            rebuild,
        } => {
            let report = command::run(&config, variable, *start, *end, *rebuild).await?;
            println!(
                "{} written, {} already present, {} without data, {} failed",
                report.written(),
                report.present(),
                report.skipped(),
                report.failed()
            );
            for (date, reason) in report.failures() {
                eprintln!("{date}: {reason}");
            }
            if report.failed() > 0 {
                bail!("{} of {} dates failed", report.failed(), report.outcomes.len());
            }
        }
        Commands::Missing {
            variable,
            start,
            end,
        } => {
            for date in command::missing(&config, variable, *start, *end).await? {
                println!("{date}");
            }
        }
        Commands::Point {
            variable,
            year,
            row,
            col,
        } => {
            let units = config.variable(variable)?.output_units();
            for p in command::point(&config, variable, *year, *row, *col)? {
                let peak = p
                    .peak_time
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{} {units}\t{}", p.date, p.value, peak);
            }
        }
    }

    Ok(())
}
