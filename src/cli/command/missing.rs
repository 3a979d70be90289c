use std::collections::BTreeSet;

use anyhow::Result;
use chrono::NaiveDate;

use crate::{cli::create_spinner, config::Config, reconcile::DateRange};

use super::build_scheduler;

pub async fn missing(
    config: &Config,
    variable: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<BTreeSet<NaiveDate>> {
    let range = DateRange::new(start, end)?;
    let scheduler = build_scheduler(config, variable)?;

    let spinner = create_spinner(format!("Checking stores for {range}"));
    let dates = scheduler.missing_dates(&range).await?;
    spinner.finish_and_clear();

    Ok(dates)
}
