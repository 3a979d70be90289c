//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring a date range into the tile store and the archive
    Run {
        #[arg(long)]
        variable: String,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,
        /// Last day, inclusive
        #[arg(long)]
        end: NaiveDate,
        /// Reprocess days already held by both stores
        #[arg(long)]
        rebuild: bool,
    },
    /// List days missing from either store
    Missing {
        #[arg(long)]
        variable: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Print one cell's archived values for a year
    Point {
        #[arg(long)]
        variable: String,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        row: usize,
        #[arg(long)]
        col: usize,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    let style = ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|style| style.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    ProgressBar::new(size).with_message(message).with_style(style)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn should_have_consistent_arguments() {
        Cli::command().debug_assert();
    }

    #[test]
    fn should_parse_run_command() {
        let cli = Cli::parse_from([
            "gridbin", "run", "--variable", "lightning", "--start", "2024-01-01", "--end",
            "2024-01-31", "--rebuild",
        ]);

        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        match cli.command {
            Commands::Run {
                variable,
                start,
                end,
                rebuild,
            } => {
                assert_eq!(variable, "lightning");
                assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
                assert_eq!(end, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
                assert!(rebuild);
            }
            _ => panic!("expected run command"),
        }
    }
}
