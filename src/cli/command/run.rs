use anyhow::Result;
use chrono::NaiveDate;

use crate::{
    cli::create_progress_bar,
    config::Config,
    reconcile::{DateRange, RunReport},
};

use super::build_scheduler;

pub async fn run(
    config: &Config,
    variable: &str,
    start: NaiveDate,
    end: NaiveDate,
    rebuild: bool,
) -> Result<RunReport> {
    let range = DateRange::new(start, end)?;
    let scheduler = build_scheduler(config, variable)?;

    let pb = create_progress_bar(range.dates().len() as u64, format!("Processing {variable}"));
    let report = scheduler.run(&range, !rebuild, &pb).await?;
    pb.finish_with_message(format!("Finished {variable}"));

    Ok(report)
}
